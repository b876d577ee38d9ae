//! Campaign delivery.
//!
//! Submissions are persisted and either started right away or armed on a
//! timer. A discovery loop picks up anything left Pending (or Scheduled and
//! due) that this process is not already delivering, which also covers
//! campaigns submitted before a restart.

use std::{sync::Arc, time::Duration};

use {
    bulkwa_common::{Campaign, CampaignStatus, MediaRef, MessageSender, SendError},
    bulkwa_store::CampaignStore,
    chrono::{DateTime, Utc},
    tokio::time::MissedTickBehavior,
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{Instrument, debug, info, info_span, warn},
};

#[cfg(feature = "metrics")]
use bulkwa_metrics::{counter, names::campaigns as campaign_metrics};

use crate::{
    active::ActiveCampaigns,
    config::CampaignConfig,
    error::{CampaignError, Result},
    progress, recipients,
};

/// A campaign as submitted by a caller.
#[derive(Debug, Clone, Default)]
pub struct NewCampaign {
    /// Caller-chosen id; generated when absent.
    pub id: Option<String>,
    pub account_id: String,
    pub recipients: serde_json::Value,
    pub body: String,
    pub media_ref: Option<String>,
    pub pacing_ms: Option<u64>,
    pub schedule_at: Option<DateTime<Utc>>,
}

/// How a delivery run ended.
enum Delivery {
    Finished { sent: u32, failed: u32, total: usize },
    /// Shutdown interrupted the run; the campaign goes back to Pending.
    Interrupted,
}

#[derive(Clone)]
pub struct CampaignWorker {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CampaignStore>,
    sender: Arc<dyn MessageSender>,
    active: ActiveCampaigns,
    config: CampaignConfig,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl CampaignWorker {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        sender: Arc<dyn MessageSender>,
        active: ActiveCampaigns,
        config: CampaignConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                sender,
                active,
                config,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn active(&self) -> &ActiveCampaigns {
        &self.inner.active
    }

    /// Persist a campaign and schedule its delivery. Does not wait for any
    /// message to be sent.
    pub async fn submit(&self, new: NewCampaign) -> Result<Campaign> {
        if new.account_id.trim().is_empty() {
            return Err(CampaignError::Invalid("account id is required".into()));
        }
        if new.body.trim().is_empty() && new.media_ref.is_none() {
            return Err(CampaignError::Invalid(
                "a message body or media is required".into(),
            ));
        }

        let now = Utc::now();
        let schedule_at = new.schedule_at.filter(|at| *at > now);
        let campaign = Campaign {
            id: new
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            account_id: new.account_id,
            recipients: new.recipients,
            body: new.body,
            media_ref: new.media_ref,
            pacing_ms: new.pacing_ms.unwrap_or(self.inner.config.default_pacing_ms),
            schedule_at: new.schedule_at,
            status: if schedule_at.is_some() {
                CampaignStatus::Scheduled
            } else {
                CampaignStatus::Pending
            },
            sent_count: 0,
            failed_count: 0,
            progress: 0,
            started_at: None,
            completed_at: None,
            last_error: None,
            created_at: now,
        };
        self.inner.store.insert_campaign(&campaign).await?;
        info!(
            campaign_id = %campaign.id,
            account_id = %campaign.account_id,
            status = %campaign.status,
            "campaign submitted"
        );

        match schedule_at {
            Some(at) => self.arm_timer(campaign.id.clone(), at),
            None => {
                self.spawn_delivery(campaign.id.clone());
            },
        }
        Ok(campaign)
    }

    pub async fn campaign(&self, id: &str) -> Result<Option<Campaign>> {
        Ok(self.inner.store.get_campaign(id).await?)
    }

    /// Requeue campaigns a previous process left Processing and start the
    /// discovery loop.
    pub async fn start(&self) -> Result<()> {
        let requeued = self.inner.store.requeue_interrupted().await?;
        if requeued > 0 {
            info!(requeued, "requeued interrupted campaigns");
        }
        let worker = self.clone();
        self.inner.tasks.spawn(async move { worker.discovery_loop().await });
        info!(
            poll_interval_secs = self.inner.config.poll_interval().as_secs(),
            "campaign worker started"
        );
        Ok(())
    }

    /// Start delivery of every Pending or due Scheduled campaign that is not
    /// already active. Returns how many were started.
    pub async fn discover(&self) -> Result<usize> {
        let limit = self.inner.config.page_size;
        let mut found = self.inner.store.list_pending(limit).await?;
        found.extend(
            self.inner
                .store
                .list_due_scheduled(Utc::now(), limit)
                .await?,
        );

        let mut started = 0;
        for campaign in found {
            if self.inner.active.contains(&campaign.id) {
                continue;
            }
            if self.spawn_delivery(campaign.id) {
                started += 1;
            }
        }
        if started > 0 {
            debug!(started, "discovered campaigns");
        }
        Ok(started)
    }

    /// Stop discovery and timers, let running deliveries reach a safe point
    /// and wait for them.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!("campaign worker stopped");
    }

    async fn discovery_loop(self) {
        let mut interval = tokio::time::interval(self.inner.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    debug!("campaign discovery stopped");
                    return;
                },
                _ = interval.tick() => {},
            }
            if let Err(e) = self.discover().await {
                warn!(error = %e, "campaign discovery failed");
            }
        }
    }

    fn arm_timer(&self, id: String, at: DateTime<Utc>) {
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        debug!(campaign_id = %id, delay_secs = delay.as_secs(), "campaign timer armed");
        let worker = self.clone();
        self.inner.tasks.spawn(async move {
            tokio::select! {
                _ = worker.inner.shutdown.cancelled() => {},
                _ = tokio::time::sleep(delay) => {
                    worker.spawn_delivery(id);
                },
            }
        });
    }

    /// Spawn a delivery task unless the campaign is already active.
    fn spawn_delivery(&self, id: String) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }
        let Some(guard) = self.inner.active.try_acquire(&id) else {
            debug!(campaign_id = %id, "campaign already active");
            return false;
        };
        let inner = Arc::clone(&self.inner);
        let span = info_span!("campaign", campaign_id = %id);
        self.inner.tasks.spawn(
            async move {
                let _active = guard;
                inner.process(&id).await;
            }
            .instrument(span),
        );
        true
    }
}

impl Inner {
    async fn process(&self, id: &str) {
        let campaign = match self.store.claim_campaign(id, Utc::now()).await {
            Ok(Some(campaign)) => campaign,
            Ok(None) => {
                debug!("campaign not claimable");
                return;
            },
            Err(e) => {
                self.fail(id, &CampaignError::from(e)).await;
                return;
            },
        };

        #[cfg(feature = "metrics")]
        counter!(campaign_metrics::STARTED).increment(1);
        info!(
            account_id = %campaign.account_id,
            resume_at = campaign.attempted(),
            "campaign processing"
        );

        match self.deliver(&campaign).await {
            Ok(Delivery::Finished {
                sent,
                failed,
                total,
            }) => {
                let result = self
                    .store
                    .complete_campaign(id, sent, failed, progress::percent(total, total), Utc::now())
                    .await;
                if let Err(e) = result {
                    warn!(error = %e, "failed to mark campaign completed");
                }
                #[cfg(feature = "metrics")]
                counter!(campaign_metrics::COMPLETED).increment(1);
                info!(sent, failed, "campaign completed");
            },
            Ok(Delivery::Interrupted) => {
                if let Err(e) = self.store.release_campaign(id).await {
                    warn!(error = %e, "failed to release interrupted campaign");
                }
                info!("campaign paused for shutdown");
            },
            Err(e) => self.fail(id, &e).await,
        }
    }

    async fn deliver(&self, campaign: &Campaign) -> Result<Delivery> {
        let recipients = recipients::parse(&campaign.recipients)?;
        let total = recipients.len();
        let resume_at = campaign.attempted().min(total);

        if self.config.require_connected_session
            && resume_at < total
            && !self.sender.is_connected(&campaign.account_id).await
        {
            return Err(CampaignError::NotConnected);
        }

        let pacing = Duration::from_millis(campaign.pacing_ms);
        let default_media = campaign.media_ref.as_deref().map(MediaRef::from_url);
        let mut sent = campaign.sent_count;
        let mut failed = campaign.failed_count;

        for (index, recipient) in recipients.iter().enumerate().skip(resume_at) {
            if index > resume_at {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Ok(Delivery::Interrupted),
                    _ = tokio::time::sleep(pacing) => {},
                }
            } else if self.shutdown.is_cancelled() {
                return Ok(Delivery::Interrupted);
            }

            let body = recipient.render_body(&campaign.body);
            let media = recipient
                .media
                .as_deref()
                .map(MediaRef::from_url)
                .or_else(|| default_media.clone());
            let result = match recipient.address.as_deref() {
                Some(address) => {
                    self.sender
                        .send(&campaign.account_id, address, &body, media.as_ref())
                        .await
                },
                None => Err(SendError::InvalidAddress("recipient has no address".into())),
            };
            match result {
                Ok(receipt) => {
                    sent += 1;
                    debug!(index, to = %receipt.to, "recipient sent");
                },
                Err(e) => {
                    failed += 1;
                    warn!(index, error = %e, "recipient failed");
                },
            }

            let percent = progress::percent(index + 1, total);
            if let Err(e) = self
                .store
                .record_progress(&campaign.id, sent, failed, percent)
                .await
            {
                warn!(error = %e, "failed to record campaign progress");
            }
        }

        Ok(Delivery::Finished {
            sent,
            failed,
            total,
        })
    }

    async fn fail(&self, id: &str, error: &CampaignError) {
        #[cfg(feature = "metrics")]
        counter!(campaign_metrics::FAILED).increment(1);
        warn!(error = %error, "campaign failed");
        if let Err(e) = self
            .store
            .fail_campaign(id, &error.to_string(), Utc::now())
            .await
        {
            warn!(error = %e, "failed to mark campaign failed");
        }
    }
}
