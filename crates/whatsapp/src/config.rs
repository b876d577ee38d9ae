//! WhatsApp session configuration.

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Default sidecar WebSocket endpoint.
pub const DEFAULT_SIDECAR_URL: &str = "ws://127.0.0.1:9876";

/// Web client version the transport identifies as.
///
/// Pinned rather than fetched: a "latest" lookup drifts and the server then
/// closes connections with status 405.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion(pub [u32; 3]);

impl ProtocolVersion {
    pub const STABLE: Self = Self([2, 2413, 1]);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::STABLE
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// How a transiently closed session is reopened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub delay_ms: u64,
    /// Growth factor applied per further attempt (1.0 keeps the delay fixed).
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before the session is abandoned.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay_ms: 3_000,
            multiplier: 1.0,
            max_delay_ms: 60_000,
            max_attempts: Some(20),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based), or `None`
    /// once the attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let factor = self.multiplier.max(1.0).powi(attempt as i32 - 1);
        let delay = (self.delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Some(Duration::from_millis(delay as u64))
    }
}

/// Configuration for the WhatsApp session manager (via Baileys sidecar).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Directory holding per-account credential state. Defaults to
    /// `whatsapp-auth` under the data directory.
    pub auth_dir: Option<PathBuf>,

    /// WebSocket URL of the Baileys sidecar.
    pub sidecar_url: String,

    pub protocol_version: ProtocolVersion,

    /// How long `create_session` waits for a pairing code or an open
    /// connection before answering with the current status.
    pub pairing_wait_secs: u64,

    /// Upper bound for a single outbound send.
    pub send_timeout_secs: u64,

    pub reconnect: ReconnectPolicy,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            auth_dir: None,
            sidecar_url: DEFAULT_SIDECAR_URL.into(),
            protocol_version: ProtocolVersion::default(),
            pairing_wait_secs: 60,
            send_timeout_secs: 60,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl WhatsAppConfig {
    pub fn pairing_wait(&self) -> Duration {
        Duration::from_secs(self.pairing_wait_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Resolved credential directory, falling back to `data_dir/whatsapp-auth`.
    pub fn auth_root(&self, data_dir: &std::path::Path) -> PathBuf {
        self.auth_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("whatsapp-auth"))
    }
}
