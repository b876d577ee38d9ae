//! `/api/init`, `/api/status/{user_id}` and `/api/disconnect/{user_id}`.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State, rejection::JsonRejection},
    },
    bulkwa_common::SessionStatus,
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
};

use crate::{error::ApiError, qr, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub success: bool,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_svg: Option<String>,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub connected: bool,
    pub phone_number: Option<String>,
    pub name: Option<String>,
    pub state: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub status: StatusBody,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
}

fn init_message(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Connected => "WhatsApp connected",
        SessionStatus::WaitingPairing => "Scan the QR code with WhatsApp",
        SessionStatus::LoggedOut => "Session logged out",
        _ => "Session initializing",
    }
}

pub async fn init_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InitRequest>, JsonRejection>,
) -> Result<Json<InitResponse>, ApiError> {
    let Json(req) = payload?;
    let account_id = req
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("userId is required".into()))?;

    info!(account_id = %account_id, "session init requested");
    let outcome = state.sessions.create_session(&account_id).await?;
    let qr_svg = outcome.pairing_code.as_deref().and_then(qr::render_svg);

    Ok(Json(InitResponse {
        success: true,
        status: outcome.status,
        message: init_message(outcome.status),
        qr_code: outcome.pairing_code,
        qr_svg,
    }))
}

pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Json<StatusResponse> {
    let view = state.sessions.session_status(&account_id).await;
    debug!(account_id = %account_id, status = %view.status, "session status");
    Json(StatusResponse {
        success: true,
        status: StatusBody {
            connected: view.connected,
            phone_number: view.identity,
            name: view.display_name,
            state: view.status,
        },
    })
}

pub async fn disconnect_session(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.sessions.destroy_session(&account_id).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Disconnected successfully",
    }))
}
