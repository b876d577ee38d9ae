//! Storage error types.

use {bulkwa_common::InvalidRecord, thiserror::Error};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidRecord(#[from] InvalidRecord),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn campaign_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "campaign",
            id: id.into(),
        }
    }
}

impl StoreError {
    pub fn campaign_exists(id: impl Into<String>) -> Self {
        Self::Conflict {
            entity: "campaign",
            id: id.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
