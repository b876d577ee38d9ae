use {bulkwa_campaigns::CampaignWorker, bulkwa_whatsapp::SessionManager};

/// State shared with every handler.
pub struct AppState {
    pub sessions: SessionManager,
    pub campaigns: CampaignWorker,
    #[cfg(feature = "prometheus")]
    pub prometheus: Option<bulkwa_metrics::PrometheusHandle>,
}

impl AppState {
    pub fn new(sessions: SessionManager, campaigns: CampaignWorker) -> Self {
        Self {
            sessions,
            campaigns,
            #[cfg(feature = "prometheus")]
            prometheus: None,
        }
    }

    #[cfg(feature = "prometheus")]
    pub fn with_prometheus(mut self, handle: bulkwa_metrics::PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
