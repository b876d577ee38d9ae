use std::sync::Arc;

use {
    anyhow::Context,
    axum::{
        Json, Router,
        extract::State,
        routing::{get, post},
    },
    chrono::{DateTime, Utc},
    serde::Serialize,
    tokio::net::TcpListener,
    tokio_util::sync::CancellationToken,
    tower_http::cors::CorsLayer,
    tracing::info,
};

use crate::{
    campaign_routes::{campaign_status, send_campaign},
    session_routes::{disconnect_session, init_session, session_status},
    state::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub active_sessions: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        active_sessions: state.sessions.active_session_count().await,
    })
}

#[cfg(feature = "prometheus")]
async fn metrics(State(state): State<Arc<AppState>>) -> axum::response::Response {
    use axum::{http::StatusCode, response::IntoResponse};

    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/api/init", post(init_session))
        .route("/api/status/{user_id}", get(session_status))
        .route("/api/disconnect/{user_id}", post(disconnect_session))
        .route("/api/campaign/send", post(send_campaign))
        .route("/api/campaign/status/{campaign_id}", get(campaign_status));

    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(metrics));

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// Serve the API on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")
}
