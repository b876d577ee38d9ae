//! Campaign worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Seconds between discovery passes over Pending and due Scheduled
    /// campaigns.
    pub poll_interval_secs: u64,
    /// Campaigns fetched per status per discovery pass.
    pub page_size: usize,
    /// Pacing used when a submission does not set one.
    pub default_pacing_ms: u64,
    /// Fail a campaign up front when its account has no connected session
    /// instead of recording a NotConnected failure for every recipient.
    pub require_connected_session: bool,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            page_size: bulkwa_store::DEFAULT_PAGE_SIZE,
            default_pacing_ms: 3_000,
            require_connected_session: true,
        }
    }
}

impl CampaignConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
