//! Metrics facade for bulkwa.
//!
//! Crates record through the re-exported `metrics` macros using the names in
//! [`names`]. Without an installed recorder every call is a no-op; the binary
//! installs the Prometheus recorder when built with the `prometheus` feature.

pub use metrics::{counter, gauge, histogram};

#[cfg(feature = "prometheus")]
pub use metrics_exporter_prometheus::PrometheusHandle;

pub mod names {
    pub mod sessions {
        /// Pairing attempts started through `create_session`.
        pub const CREATED: &str = "bulkwa_sessions_created_total";
        pub const RECONNECTS: &str = "bulkwa_session_reconnects_total";
        pub const LOGGED_OUT: &str = "bulkwa_sessions_logged_out_total";
        /// Registry entries, updated on every insert and removal.
        pub const ACTIVE: &str = "bulkwa_sessions_active";
    }

    pub mod messages {
        pub const SENT: &str = "bulkwa_messages_sent_total";
        pub const FAILED: &str = "bulkwa_messages_failed_total";
        pub const SEND_DURATION: &str = "bulkwa_message_send_duration_seconds";
    }

    pub mod campaigns {
        pub const STARTED: &str = "bulkwa_campaigns_started_total";
        pub const COMPLETED: &str = "bulkwa_campaigns_completed_total";
        pub const FAILED: &str = "bulkwa_campaigns_failed_total";
    }
}

/// Install the global Prometheus recorder and return the handle used to
/// render the scrape output.
#[cfg(feature = "prometheus")]
pub fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))
}
