//! Engine liveness row.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::Serialize,
};

use crate::error::StoreResult;

/// Latest liveness report of the engine process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heartbeat {
    pub status: String,
    pub active_sessions: usize,
    pub last_heartbeat: DateTime<Utc>,
}

impl Heartbeat {
    pub fn alive(active_sessions: usize) -> Self {
        Self {
            status: "alive".into(),
            active_sessions,
            last_heartbeat: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    /// Overwrite the single heartbeat row.
    async fn record_heartbeat(&self, heartbeat: &Heartbeat) -> StoreResult<()>;

    async fn last_heartbeat(&self) -> StoreResult<Option<Heartbeat>>;
}
