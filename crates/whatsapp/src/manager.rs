//! Session lifecycle: pairing, reconnection, teardown and sending.

use std::sync::Arc;

use {
    async_trait::async_trait,
    bulkwa_common::{MediaRef, MessageSender, SendError, SendReceipt, SessionRecord, SessionStatus},
    bulkwa_store::SessionStore,
    serde::Serialize,
    tokio::sync::{mpsc, watch},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, instrument, warn},
};

#[cfg(feature = "metrics")]
use bulkwa_metrics::{
    counter, histogram,
    names::{messages as message_metrics, sessions as session_metrics},
};

use crate::{
    auth::{AuthStore, validate_account_id},
    config::WhatsAppConfig,
    error::{Result, TransportError},
    jid::to_jid,
    registry::SessionRegistry,
    state::{Action, SessionSnapshot},
    transport::{
        CloseReason, DisconnectKind, OpenRequest, OutboundMessage, Transport, TransportEvent,
    },
};

/// Answer to `create_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateOutcome {
    pub status: SessionStatus,
    /// Present only while waiting for the code to be scanned.
    pub pairing_code: Option<String>,
}

impl CreateOutcome {
    fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            status: snapshot.status,
            pairing_code: match snapshot.status {
                SessionStatus::WaitingPairing => snapshot.pairing_code.clone(),
                _ => None,
            },
        }
    }

    fn disconnected() -> Self {
        Self {
            status: SessionStatus::Disconnected,
            pairing_code: None,
        }
    }

    fn initializing() -> Self {
        Self {
            status: SessionStatus::Initializing,
            pairing_code: None,
        }
    }
}

/// In-process view of one account's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatusView {
    pub connected: bool,
    pub identity: Option<String>,
    pub display_name: Option<String>,
    pub status: SessionStatus,
}

/// Owns every WhatsApp session of the process.
///
/// Cheap to clone; clones share the same registry and tasks.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
    registry: Arc<SessionRegistry>,
    auth: AuthStore,
    config: WhatsAppConfig,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        registry: Arc<SessionRegistry>,
        auth: AuthStore,
        config: WhatsAppConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                registry,
                auth,
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// Start pairing (or reconnecting) `account_id`.
    ///
    /// Returns as soon as a pairing code or an open connection is observed,
    /// or with the current status once `pairing_wait` has elapsed.
    #[instrument(skip(self))]
    pub async fn create_session(&self, account_id: &str) -> Result<CreateOutcome> {
        validate_account_id(account_id)?;
        let registry = &self.inner.registry;

        if let Some(snapshot) = registry.snapshot(account_id).await
            && snapshot.is_connected()
        {
            debug!(account_id, "session already connected");
            return Ok(CreateOutcome::from_snapshot(&snapshot));
        }
        let Some(attempt) = registry.try_begin(account_id).await else {
            debug!(account_id, "connection attempt already in flight");
            return Ok(CreateOutcome::initializing());
        };

        #[cfg(feature = "metrics")]
        counter!(session_metrics::CREATED).increment(1);
        info!(account_id, "starting session");

        let state = match self.inner.start(account_id, &attempt).await {
            Ok(state) => state,
            Err(_) if attempt.is_cancelled() => {
                info!(account_id, "session destroyed while connecting");
                return Ok(CreateOutcome::disconnected());
            },
            Err(e) => {
                warn!(account_id, error = %e, "failed to start session");
                registry.finish(account_id).await;
                self.inner
                    .persist(&SessionRecord::disconnected(account_id))
                    .await;
                return Err(e);
            },
        };
        Ok(self.inner.await_pairing(state).await)
    }

    pub async fn session_status(&self, account_id: &str) -> SessionStatusView {
        match self.inner.registry.snapshot(account_id).await {
            Some(snapshot) => SessionStatusView {
                connected: snapshot.is_connected(),
                identity: snapshot.identity,
                display_name: snapshot.display_name,
                status: snapshot.status,
            },
            None => SessionStatusView {
                connected: false,
                identity: None,
                display_name: None,
                status: SessionStatus::Uninitialized,
            },
        }
    }

    /// Log out, forget credentials and mark the account Disconnected.
    ///
    /// Safe to call for accounts that have no session.
    #[instrument(skip(self))]
    pub async fn destroy_session(&self, account_id: &str) -> Result<()> {
        validate_account_id(account_id)?;
        if let Some(removed) = self.inner.registry.remove(account_id).await {
            removed.cancel.cancel();
            if let Some(connection) = removed.connection {
                match tokio::time::timeout(self.inner.config.send_timeout(), connection.logout())
                    .await
                {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => warn!(account_id, error = %e, "logout failed"),
                    Err(_) => warn!(account_id, "logout timed out"),
                }
            }
        }
        self.inner.auth.purge(account_id).await?;
        self.inner
            .persist(&SessionRecord::disconnected(account_id))
            .await;
        info!(account_id, "session destroyed");
        Ok(())
    }

    pub async fn destroy_all(&self) {
        for account_id in self.inner.registry.account_ids().await {
            if let Err(e) = self.destroy_session(&account_id).await {
                warn!(account_id = %account_id, error = %e, "failed to destroy session");
            }
        }
    }

    pub async fn active_session_count(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Destroy every session and stop all background tasks.
    pub async fn shutdown(&self) {
        self.destroy_all().await;
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    /// Open a connection and hand its events to a new driver task.
    ///
    /// `attempt` is the in-flight token; a session destroyed while the
    /// transport was opening is not resurrected.
    async fn start(
        self: &Arc<Self>,
        account_id: &str,
        attempt: &CancellationToken,
    ) -> Result<watch::Receiver<SessionSnapshot>> {
        self.auth.clean_ghost(account_id).await?;
        let auth_dir = self.auth.prepare(account_id).await?;
        let credentials = match self.auth.load(account_id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(account_id, error = %e, "ignoring unreadable credentials");
                None
            },
        };
        self.persist(&SessionRecord::initializing(account_id)).await;

        let opened = self
            .transport
            .open(OpenRequest {
                account_id: account_id.to_string(),
                auth_dir,
                credentials,
                protocol_version: self.config.protocol_version,
            })
            .await?;

        let installed = self
            .registry
            .install(
                account_id,
                Arc::clone(&opened.connection),
                attempt,
                &self.shutdown,
            )
            .await;
        let Some(installed) = installed else {
            opened.connection.close().await;
            return Err(TransportError::Closed.into());
        };
        if let Some(old) = installed.replaced {
            old.close().await;
        }
        tokio::spawn(Arc::clone(self).drive(
            account_id.to_string(),
            installed.generation,
            opened.events,
            installed.cancel,
        ));
        Ok(installed.state)
    }

    async fn await_pairing(&self, mut state: watch::Receiver<SessionSnapshot>) -> CreateOutcome {
        let observed = {
            let waited = tokio::time::timeout(
                self.config.pairing_wait(),
                state.wait_for(|s| s.status != SessionStatus::Initializing),
            )
            .await;
            match waited {
                Ok(Ok(snapshot)) => Some(CreateOutcome::from_snapshot(&snapshot)),
                // Entry removed while waiting.
                Ok(Err(_)) => Some(CreateOutcome {
                    status: SessionStatus::Disconnected,
                    pairing_code: None,
                }),
                Err(_) => None,
            }
        };
        observed.unwrap_or_else(|| CreateOutcome::from_snapshot(&state.borrow()))
    }

    /// Apply one connection's events until it closes or is cancelled.
    async fn drive(
        self: Arc<Self>,
        account_id: String,
        generation: u64,
        mut events: mpsc::Receiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(account_id = %account_id, "session driver stopped");
                    return;
                },
                event = events.recv() => event.unwrap_or_else(|| {
                    TransportEvent::Close(CloseReason::transient("event stream ended"))
                }),
            };
            if let TransportEvent::Close(reason) = &event {
                info!(
                    account_id = %account_id,
                    status_code = ?reason.status_code,
                    reason = %reason.message,
                    "connection closed"
                );
            }

            let Some(applied) = self.registry.apply(&account_id, generation, event).await else {
                return;
            };
            if let Some(connection) = applied.detached {
                connection.close().await;
            }
            for action in applied.actions {
                match action {
                    Action::Persist(record) => self.persist(&record).await,
                    Action::PersistCredentials(delta) => {
                        if let Err(e) = self.auth.apply_delta(&account_id, &delta).await {
                            warn!(account_id = %account_id, error = %e, "failed to persist credentials");
                        }
                    },
                    Action::Established => {
                        self.registry.finish(&account_id).await;
                        info!(account_id = %account_id, "session connected");
                    },
                    Action::Reconnect(kind) => {
                        if kind == DisconnectKind::VersionMismatch {
                            warn!(
                                account_id = %account_id,
                                version = %self.config.protocol_version,
                                "server rejected client version"
                            );
                        }
                        self.registry.begin_or_join(&account_id).await;
                        self.schedule_reconnect(account_id.clone(), generation);
                        return;
                    },
                    Action::Terminate => {
                        self.terminate(&account_id).await;
                        return;
                    },
                }
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, account_id: String, generation: u64) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.reconnect(account_id, generation).await });
    }

    async fn reconnect(self: Arc<Self>, account_id: String, generation: u64) {
        let Some((attempt, cancel)) = self.registry.next_attempt(&account_id, generation).await
        else {
            return;
        };
        let Some(delay) = self.config.reconnect.delay_for(attempt) else {
            warn!(account_id = %account_id, attempt, "reconnect attempts exhausted, giving up");
            self.registry.remove(&account_id).await;
            return;
        };

        #[cfg(feature = "metrics")]
        counter!(session_metrics::RECONNECTS).increment(1);
        info!(
            account_id = %account_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(account_id = %account_id, "reconnect cancelled");
                return;
            },
            _ = tokio::time::sleep(delay) => {},
        }

        let Some(attempt_token) = self.registry.attempt(&account_id).await else {
            return;
        };
        if let Err(e) = self.start(&account_id, &attempt_token).await {
            if cancel.is_cancelled() || attempt_token.is_cancelled() {
                return;
            }
            warn!(account_id = %account_id, attempt, error = %e, "reconnect attempt failed");
            self.persist(&SessionRecord::disconnected(&account_id)).await;
            self.schedule_reconnect(account_id, generation);
        }
    }

    async fn terminate(&self, account_id: &str) {
        #[cfg(feature = "metrics")]
        counter!(session_metrics::LOGGED_OUT).increment(1);
        if let Some(removed) = self.registry.remove(account_id).await {
            removed.cancel.cancel();
            if let Some(connection) = removed.connection {
                connection.close().await;
            }
        }
        if let Err(e) = self.auth.purge(account_id).await {
            warn!(account_id, error = %e, "failed to remove credentials");
        }
        info!(account_id, "session logged out");
    }

    async fn persist(&self, record: &SessionRecord) {
        if let Err(e) = self.store.upsert_session(record).await {
            warn!(
                account_id = record.account_id(),
                status = %record.status(),
                error = %e,
                "failed to persist session status"
            );
        }
    }
}

#[async_trait]
impl MessageSender for SessionManager {
    async fn send(
        &self,
        account_id: &str,
        to: &str,
        body: &str,
        media: Option<&MediaRef>,
    ) -> std::result::Result<SendReceipt, SendError> {
        let jid = to_jid(to)?;
        let handle = self
            .inner
            .registry
            .send_handle(account_id)
            .await
            .ok_or(SendError::NotConnected)?;
        let send_timeout = self.inner.config.send_timeout();
        let message = OutboundMessage {
            to: &jid,
            body,
            media,
        };

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();
        let result = tokio::select! {
            _ = handle.cancel.cancelled() => Err(SendError::NotConnected),
            result = async {
                let _serialized = handle.send_lock.lock().await;
                if !self.inner.registry.is_connected(account_id).await {
                    return Err(SendError::NotConnected);
                }
                match tokio::time::timeout(send_timeout, handle.connection.send(message)).await {
                    Ok(result) => result,
                    Err(_) => Err(SendError::Timeout(send_timeout)),
                }
            } => result,
        };

        match &result {
            Ok(_) => {
                #[cfg(feature = "metrics")]
                {
                    counter!(message_metrics::SENT).increment(1);
                    histogram!(message_metrics::SEND_DURATION)
                        .record(started.elapsed().as_secs_f64());
                }
                debug!(account_id, to = %jid, "message sent");
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(message_metrics::FAILED).increment(1);
                debug!(account_id, to = %jid, error = %e, "send failed");
            },
        }
        result
    }

    async fn is_connected(&self, account_id: &str) -> bool {
        self.inner.registry.is_connected(account_id).await
    }
}
