use std::{sync::Arc, time::Duration};

use {
    bulkwa_store::{Heartbeat, HeartbeatStore},
    bulkwa_whatsapp::SessionManager,
    tokio::{task::JoinHandle, time::MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

/// Overwrite the liveness row every `interval` until `cancel` fires.
///
/// The first beat is written immediately. Store failures are logged and
/// retried on the next tick.
pub fn spawn_heartbeat(
    sessions: SessionManager,
    store: Arc<dyn HeartbeatStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {},
            }
            let active_sessions = sessions.active_session_count().await;
            match store.record_heartbeat(&Heartbeat::alive(active_sessions)).await {
                Ok(()) => debug!(active_sessions, "heartbeat recorded"),
                Err(e) => warn!(error = %e, "failed to record heartbeat"),
            }
        }
    })
}
