//! Campaign record storage.

use {
    async_trait::async_trait,
    bulkwa_common::Campaign,
    chrono::{DateTime, Utc},
};

use crate::error::StoreResult;

/// Storage interface for campaigns and their delivery progress.
///
/// Each write is independent; none of them needs a transaction spanning
/// more than one record.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: &Campaign) -> StoreResult<()>;

    async fn get_campaign(&self, id: &str) -> StoreResult<Option<Campaign>>;

    /// Oldest Pending campaigns first, at most `limit`.
    async fn list_pending(&self, limit: usize) -> StoreResult<Vec<Campaign>>;

    /// Scheduled campaigns whose `schedule_at` is at or before `now`.
    async fn list_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Campaign>>;

    /// Move a Pending or Scheduled campaign to Processing.
    ///
    /// Returns the claimed campaign, or `None` when it does not exist or is
    /// not in a claimable status (another claimer got there first).
    /// `started_at` is only set on the first claim.
    async fn claim_campaign(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> StoreResult<Option<Campaign>>;

    async fn record_progress(
        &self,
        id: &str,
        sent_count: u32,
        failed_count: u32,
        progress: u8,
    ) -> StoreResult<()>;

    async fn complete_campaign(
        &self,
        id: &str,
        sent_count: u32,
        failed_count: u32,
        progress: u8,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn fail_campaign(
        &self,
        id: &str,
        error: &str,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Hand a Processing campaign back to Pending, keeping its counts so the
    /// next claim resumes where this one stopped.
    async fn release_campaign(&self, id: &str) -> StoreResult<()>;

    /// Release every Processing campaign. Returns how many were requeued.
    async fn requeue_interrupted(&self) -> StoreResult<u64>;
}
