use {
    axum::{
        Json,
        extract::rejection::JsonRejection,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    bulkwa_campaigns::CampaignError,
    bulkwa_store::StoreError,
    bulkwa_whatsapp::{SessionError, TransportError},
    serde_json::json,
    tracing::error,
};

/// Error returned by API handlers, rendered as `{"success": false, "error"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Campaign(#[from] CampaignError),
}

impl ApiError {
    pub fn missing_fields() -> Self {
        Self::BadRequest("Missing required fields".into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Session(SessionError::InvalidAccount(_)) => StatusCode::BAD_REQUEST,
            Self::Session(SessionError::Transport(TransportError::Unavailable(_))) => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            Self::Session(SessionError::Transport(_)) => StatusCode::BAD_GATEWAY,
            Self::Session(SessionError::Auth(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Campaign(CampaignError::Invalid(_))
            | Self::Campaign(CampaignError::MalformedRecipients(_)) => StatusCode::BAD_REQUEST,
            Self::Campaign(CampaignError::NotConnected) => StatusCode::CONFLICT,
            Self::Campaign(CampaignError::Store(StoreError::Conflict { .. })) => {
                StatusCode::CONFLICT
            },
            Self::Campaign(CampaignError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(ApiError::missing_fields().status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(SessionError::InvalidAccount("..".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SessionError::Transport(TransportError::Unavailable(
                "down".into()
            )))
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(CampaignError::Invalid("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(CampaignError::from(StoreError::campaign_exists("dup"))).status(),
            StatusCode::CONFLICT
        );
    }
}
