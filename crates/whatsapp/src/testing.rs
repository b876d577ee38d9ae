//! Scripted in-memory [`Transport`] for tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    bulkwa_common::{MediaRef, SendError, SendReceipt},
    serde_json::json,
    tokio::sync::{Mutex, mpsc},
};

use crate::{
    auth::Credentials,
    error::TransportError,
    transport::{
        Connection, EVENT_BUFFER, OpenRequest, OpenedConnection, OutboundMessage, Transport,
        TransportEvent,
    },
};

/// What a freshly opened fake connection reports on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OnOpen {
    /// Emit a pairing code.
    #[default]
    Pair,
    /// Emit paired credentials and an open event.
    Connect { identity: String },
    /// Emit nothing; the test drives events with [`FakeTransport::emit`].
    Silent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub account_id: String,
    pub to: String,
    pub body: String,
    pub media: Option<MediaRef>,
    pub at: tokio::time::Instant,
}

#[derive(Default)]
struct FakeState {
    on_open: OnOpen,
    opens: Vec<OpenRequest>,
    events: HashMap<String, mpsc::Sender<TransportEvent>>,
    sent: Vec<SentMessage>,
    logouts: Vec<String>,
    closes: Vec<String>,
    failing_opens: usize,
    open_delay: Option<Duration>,
    rejected: HashSet<String>,
    send_delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose connections open straight away as `identity`.
    pub fn connecting(identity: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                on_open: OnOpen::Connect {
                    identity: identity.into(),
                },
                ..FakeState::default()
            })),
        }
    }

    pub async fn set_on_open(&self, on_open: OnOpen) {
        self.state.lock().await.on_open = on_open;
    }

    pub async fn open_count(&self, account_id: &str) -> usize {
        self.state
            .lock()
            .await
            .opens
            .iter()
            .filter(|r| r.account_id == account_id)
            .count()
    }

    pub async fn last_open(&self, account_id: &str) -> Option<OpenRequest> {
        self.state
            .lock()
            .await
            .opens
            .iter()
            .rev()
            .find(|r| r.account_id == account_id)
            .cloned()
    }

    /// Push an event onto the account's latest connection. Returns whether
    /// anyone was listening.
    pub async fn emit(&self, account_id: &str, event: TransportEvent) -> bool {
        let events = self.state.lock().await.events.get(account_id).cloned();
        match events {
            Some(events) => events.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().await.sent.clone()
    }

    pub async fn logouts(&self) -> Vec<String> {
        self.state.lock().await.logouts.clone()
    }

    /// Accounts whose connections were closed, oldest first.
    pub async fn closes(&self) -> Vec<String> {
        self.state.lock().await.closes.clone()
    }

    /// Make every `open` wait `delay` before producing a connection.
    pub async fn set_open_delay(&self, delay: Duration) {
        self.state.lock().await.open_delay = Some(delay);
    }

    pub async fn fail_next_opens(&self, count: usize) {
        self.state.lock().await.failing_opens = count;
    }

    /// Make sends to `jid` fail with [`SendError::Rejected`].
    pub async fn reject_sends_to(&self, jid: impl Into<String>) {
        self.state.lock().await.rejected.insert(jid.into());
    }

    pub async fn set_send_delay(&self, delay: Duration) {
        self.state.lock().await.send_delay = Some(delay);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, request: OpenRequest) -> Result<OpenedConnection, TransportError> {
        let open_delay = self.state.lock().await.open_delay;
        if let Some(delay) = open_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().await;
        state.opens.push(request.clone());
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(TransportError::Unavailable("scripted open failure".into()));
        }

        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let attempt = state.opens.len();
        match &state.on_open {
            OnOpen::Pair => {
                let _ = tx.try_send(TransportEvent::PairingCode(format!(
                    "fake-qr-{}-{attempt}",
                    request.account_id
                )));
            },
            OnOpen::Connect { identity } => {
                let creds: Credentials = json!({"me": {"id": format!("{identity}:1@s.whatsapp.net")}})
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                let _ = tx.try_send(TransportEvent::CredentialsUpdated(creds));
                let _ = tx.try_send(TransportEvent::Open {
                    identity: identity.clone(),
                    display_name: None,
                });
            },
            OnOpen::Silent => {},
        }
        state.events.insert(request.account_id.clone(), tx);

        Ok(OpenedConnection {
            connection: Arc::new(FakeConnection {
                account_id: request.account_id,
                state: Arc::clone(&self.state),
                closed: AtomicBool::new(false),
            }),
            events,
        })
    }
}

struct FakeConnection {
    account_id: String,
    state: Arc<Mutex<FakeState>>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<SendReceipt, SendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError::NotConnected);
        }
        let delay = self.state.lock().await.send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.rejected.contains(message.to) {
            return Err(SendError::Rejected("scripted rejection".into()));
        }
        state.sent.push(SentMessage {
            account_id: self.account_id.clone(),
            to: message.to.to_string(),
            body: message.body.to_string(),
            media: message.media.cloned(),
            at: tokio::time::Instant::now(),
        });
        Ok(SendReceipt {
            to: message.to.to_string(),
            message_id: Some(format!("fake-{}", state.sent.len())),
        })
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.state.lock().await.logouts.push(self.account_id.clone());
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.lock().await.closes.push(self.account_id.clone());
        }
    }
}
