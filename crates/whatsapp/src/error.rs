use std::path::PathBuf;

/// Failure talking to the WhatsApp transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("transport rejected request: {0}")]
    Rejected(String),

    #[error("transport connection closed")]
    Closed,
}

/// Failure reading or writing on-disk credential state.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("credential io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed credential file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Error returned to callers of the session manager.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid account id: {0:?}")]
    InvalidAccount(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
