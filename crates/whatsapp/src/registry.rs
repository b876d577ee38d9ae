//! In-process registry of live sessions.
//!
//! Owns, per account, the state machine, the current connection, the
//! cancellation token that guards its tasks and the lock that serializes
//! sends. Also tracks which accounts have a connection attempt in flight.

use std::{collections::HashMap, sync::Arc};

use {
    bulkwa_common::SessionStatus,
    tokio::sync::{Mutex, watch},
    tokio_util::sync::CancellationToken,
};

#[cfg(feature = "metrics")]
use bulkwa_metrics::{gauge, names::sessions as session_metrics};

use crate::{
    state::{Action, SessionMachine, SessionSnapshot},
    transport::{Connection, TransportEvent},
};

struct SessionEntry {
    machine: SessionMachine,
    /// Bumped whenever a new connection is installed so events from an
    /// older connection are ignored.
    generation: u64,
    connection: Option<Arc<dyn Connection>>,
    cancel: CancellationToken,
    send_lock: Arc<Mutex<()>>,
    state: watch::Sender<SessionSnapshot>,
    reconnect_attempts: u32,
}

/// Result of installing a freshly opened connection.
pub(crate) struct Installed {
    pub generation: u64,
    pub cancel: CancellationToken,
    pub state: watch::Receiver<SessionSnapshot>,
    /// Connection that was replaced, to be closed by the caller.
    pub replaced: Option<Arc<dyn Connection>>,
}

/// Result of feeding one event to a state machine.
pub(crate) struct Applied {
    pub actions: Vec<Action>,
    /// Connection dropped by a reconnect, to be closed by the caller.
    pub detached: Option<Arc<dyn Connection>>,
}

/// Everything a send needs, cloned out of the registry lock.
pub(crate) struct SendHandle {
    pub connection: Arc<dyn Connection>,
    pub send_lock: Arc<Mutex<()>>,
    pub cancel: CancellationToken,
}

pub(crate) struct Removed {
    pub connection: Option<Arc<dyn Connection>>,
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, SessionEntry>>,
    /// Connection attempts in flight. Each token is cancelled when the
    /// account is removed before its attempt installs a connection.
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a connection attempt as in flight and return its token, or
    /// `None` when one already is.
    pub(crate) async fn try_begin(&self, account_id: &str) -> Option<CancellationToken> {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains_key(account_id) {
            return None;
        }
        let attempt = CancellationToken::new();
        in_flight.insert(account_id.to_string(), attempt.clone());
        Some(attempt)
    }

    /// Token of the attempt in flight, marking one if none is.
    pub(crate) async fn begin_or_join(&self, account_id: &str) -> CancellationToken {
        self.in_flight
            .lock()
            .await
            .entry(account_id.to_string())
            .or_default()
            .clone()
    }

    pub(crate) async fn attempt(&self, account_id: &str) -> Option<CancellationToken> {
        self.in_flight.lock().await.get(account_id).cloned()
    }

    pub async fn finish(&self, account_id: &str) {
        self.in_flight.lock().await.remove(account_id);
    }

    pub async fn is_in_flight(&self, account_id: &str) -> bool {
        self.in_flight.lock().await.contains_key(account_id)
    }

    pub async fn snapshot(&self, account_id: &str) -> Option<SessionSnapshot> {
        self.entries
            .lock()
            .await
            .get(account_id)
            .map(|e| e.machine.snapshot())
    }

    pub async fn is_connected(&self, account_id: &str) -> bool {
        self.entries
            .lock()
            .await
            .get(account_id)
            .is_some_and(|e| e.machine.status() == SessionStatus::Connected)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn account_ids(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    /// Install `connection` for the attempt `attempt`.
    ///
    /// Returns `None`, installing nothing, when the attempt was cancelled
    /// by a removal while the connection was opening.
    pub(crate) async fn install(
        &self,
        account_id: &str,
        connection: Arc<dyn Connection>,
        attempt: &CancellationToken,
        parent: &CancellationToken,
    ) -> Option<Installed> {
        let mut entries = self.entries.lock().await;
        if attempt.is_cancelled() {
            return None;
        }
        let entry = entries.entry(account_id.to_string()).or_insert_with(|| {
            let machine = SessionMachine::new(account_id);
            let (state, _) = watch::channel(machine.snapshot());
            SessionEntry {
                machine,
                generation: 0,
                connection: None,
                cancel: parent.child_token(),
                send_lock: Arc::new(Mutex::new(())),
                state,
                reconnect_attempts: 0,
            }
        });
        entry.generation += 1;
        entry.machine.begin();
        entry.state.send_replace(entry.machine.snapshot());
        let replaced = entry.connection.replace(connection);
        let installed = Installed {
            generation: entry.generation,
            cancel: entry.cancel.clone(),
            state: entry.state.subscribe(),
            replaced,
        };
        #[cfg(feature = "metrics")]
        gauge!(session_metrics::ACTIVE).set(entries.len() as f64);
        Some(installed)
    }

    /// Feed an event to the account's state machine.
    ///
    /// Returns `None` when the entry is gone or the event belongs to a
    /// connection that has since been replaced.
    pub(crate) async fn apply(
        &self,
        account_id: &str,
        generation: u64,
        event: TransportEvent,
    ) -> Option<Applied> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(account_id)?;
        if entry.generation != generation {
            return None;
        }
        let actions = entry.machine.handle(event);
        if actions.contains(&Action::Established) {
            entry.reconnect_attempts = 0;
        }
        let detached = if actions.iter().any(|a| matches!(a, Action::Reconnect(_))) {
            entry.connection.take()
        } else {
            None
        };
        entry.state.send_replace(entry.machine.snapshot());
        Some(Applied { actions, detached })
    }

    /// Count the next reconnect attempt for the connection `generation`.
    pub(crate) async fn next_attempt(
        &self,
        account_id: &str,
        generation: u64,
    ) -> Option<(u32, CancellationToken)> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(account_id)?;
        if entry.generation != generation {
            return None;
        }
        entry.reconnect_attempts += 1;
        Some((entry.reconnect_attempts, entry.cancel.clone()))
    }

    pub(crate) async fn send_handle(&self, account_id: &str) -> Option<SendHandle> {
        let entries = self.entries.lock().await;
        let entry = entries.get(account_id)?;
        if entry.machine.status() != SessionStatus::Connected {
            return None;
        }
        Some(SendHandle {
            connection: Arc::clone(entry.connection.as_ref()?),
            send_lock: Arc::clone(&entry.send_lock),
            cancel: entry.cancel.clone(),
        })
    }

    /// Drop the account's entry and cancel its in-flight attempt.
    ///
    /// The attempt is cancelled before the entry goes, so an `install`
    /// racing this call either lands first (and is removed here) or is
    /// refused.
    pub(crate) async fn remove(&self, account_id: &str) -> Option<Removed> {
        if let Some(attempt) = self.in_flight.lock().await.remove(account_id) {
            attempt.cancel();
        }
        let removed = {
            let mut entries = self.entries.lock().await;
            let removed = entries.remove(account_id);
            #[cfg(feature = "metrics")]
            gauge!(session_metrics::ACTIVE).set(entries.len() as f64);
            removed
        };
        removed.map(|entry| Removed {
            connection: entry.connection,
            cancel: entry.cancel,
        })
    }
}
