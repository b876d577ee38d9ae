//! In-memory backend for tests and ephemeral runs.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use {
    async_trait::async_trait,
    bulkwa_common::{Campaign, CampaignStatus, SessionRecord, SessionStatus},
    chrono::{DateTime, Utc},
    tokio::sync::RwLock,
};

use crate::{
    campaign::CampaignStore,
    error::{StoreError, StoreResult},
    heartbeat::{Heartbeat, HeartbeatStore},
    session::SessionStore,
};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    session_log: Vec<SessionRecord>,
    campaigns: HashMap<String, Campaign>,
    progress_log: HashMap<String, Vec<u8>>,
    heartbeat: Option<Heartbeat>,
}

/// Store that keeps everything in process memory.
///
/// Also records every session write and every progress value so tests can
/// assert on the sequence of transitions, and can simulate an outage with
/// [`MemoryStore::set_unavailable`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }

    /// Every status written for `account_id`, oldest first.
    pub async fn session_history(&self, account_id: &str) -> Vec<SessionStatus> {
        self.inner
            .read()
            .await
            .session_log
            .iter()
            .filter(|r| r.account_id() == account_id)
            .map(|r| r.status())
            .collect()
    }

    /// Every progress value written for campaign `id`, oldest first.
    pub async fn progress_history(&self, id: &str) -> Vec<u8> {
        self.inner
            .read()
            .await
            .progress_log
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    async fn update_campaign<F>(&self, id: &str, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Campaign) + Send,
    {
        self.check()?;
        let mut inner = self.inner.write().await;
        let campaign = inner
            .campaigns
            .get_mut(id)
            .ok_or_else(|| StoreError::campaign_not_found(id))?;
        f(campaign);
        let progress = campaign.progress;
        inner
            .progress_log
            .entry(id.to_string())
            .or_default()
            .push(progress);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert_session(&self, record: &SessionRecord) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        inner
            .sessions
            .insert(record.account_id().to_string(), record.clone());
        inner.session_log.push(record.clone());
        Ok(())
    }

    async fn get_session(&self, account_id: &str) -> StoreResult<Option<SessionRecord>> {
        self.check()?;
        Ok(self.inner.read().await.sessions.get(account_id).cloned())
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn insert_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if inner.campaigns.contains_key(&campaign.id) {
            return Err(StoreError::campaign_exists(&campaign.id));
        }
        inner.campaigns.insert(campaign.id.clone(), campaign.clone());
        Ok(())
    }

    async fn get_campaign(&self, id: &str) -> StoreResult<Option<Campaign>> {
        self.check()?;
        Ok(self.inner.read().await.campaigns.get(id).cloned())
    }

    async fn list_pending(&self, limit: usize) -> StoreResult<Vec<Campaign>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut pending: Vec<Campaign> = inner
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn list_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Campaign>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut due: Vec<Campaign> = inner
            .campaigns
            .values()
            .filter(|c| {
                c.status == CampaignStatus::Scheduled && c.schedule_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|c| c.schedule_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_campaign(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> StoreResult<Option<Campaign>> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let Some(campaign) = inner.campaigns.get_mut(id) else {
            return Ok(None);
        };
        if !matches!(
            campaign.status,
            CampaignStatus::Pending | CampaignStatus::Scheduled
        ) {
            return Ok(None);
        }
        campaign.status = CampaignStatus::Processing;
        campaign.started_at.get_or_insert(started_at);
        Ok(Some(campaign.clone()))
    }

    async fn record_progress(
        &self,
        id: &str,
        sent_count: u32,
        failed_count: u32,
        progress: u8,
    ) -> StoreResult<()> {
        self.update_campaign(id, |c| {
            c.sent_count = sent_count;
            c.failed_count = failed_count;
            c.progress = progress;
        })
        .await
    }

    async fn complete_campaign(
        &self,
        id: &str,
        sent_count: u32,
        failed_count: u32,
        progress: u8,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.update_campaign(id, |c| {
            c.status = CampaignStatus::Completed;
            c.sent_count = sent_count;
            c.failed_count = failed_count;
            c.progress = progress;
            c.completed_at = Some(completed_at);
        })
        .await
    }

    async fn fail_campaign(
        &self,
        id: &str,
        error: &str,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let error = error.to_string();
        self.update_campaign(id, move |c| {
            c.status = CampaignStatus::Failed;
            c.last_error = Some(error);
            c.completed_at = Some(completed_at);
        })
        .await
    }

    async fn release_campaign(&self, id: &str) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if let Some(campaign) = inner.campaigns.get_mut(id)
            && campaign.status == CampaignStatus::Processing
        {
            campaign.status = CampaignStatus::Pending;
        }
        Ok(())
    }

    async fn requeue_interrupted(&self) -> StoreResult<u64> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let mut requeued = 0;
        for campaign in inner.campaigns.values_mut() {
            if campaign.status == CampaignStatus::Processing {
                campaign.status = CampaignStatus::Pending;
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}

#[async_trait]
impl HeartbeatStore for MemoryStore {
    async fn record_heartbeat(&self, heartbeat: &Heartbeat) -> StoreResult<()> {
        self.check()?;
        self.inner.write().await.heartbeat = Some(heartbeat.clone());
        Ok(())
    }

    async fn last_heartbeat(&self) -> StoreResult<Option<Heartbeat>> {
        self.check()?;
        Ok(self.inner.read().await.heartbeat.clone())
    }
}
