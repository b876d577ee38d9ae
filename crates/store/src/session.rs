//! Session record storage.

use {async_trait::async_trait, bulkwa_common::SessionRecord};

use crate::error::StoreResult;

/// Storage interface for per-account session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace the record for `record.account_id()`.
    ///
    /// Writing the same record twice is harmless.
    async fn upsert_session(&self, record: &SessionRecord) -> StoreResult<()>;

    async fn get_session(&self, account_id: &str) -> StoreResult<Option<SessionRecord>>;
}
