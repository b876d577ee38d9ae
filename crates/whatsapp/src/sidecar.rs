//! WebSocket communication with the WhatsApp Baileys sidecar.
//!
//! One socket carries every account. [`SidecarTransport`] demultiplexes the
//! sidecar's messages into per-account event channels and matches send
//! results to their requests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    bulkwa_common::{SendError, SendReceipt},
    futures::{SinkExt, StreamExt},
    tokio::sync::{Mutex, RwLock, mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, error, info, warn},
};

use crate::{
    error::TransportError,
    jid::identity_from_jid,
    transport::{
        CloseReason, Connection, EVENT_BUFFER, OpenRequest, OpenedConnection, OutboundMessage,
        Transport, TransportEvent,
    },
    types::{GatewayMessage, SidecarMessage},
};

const CONNECT_RETRIES: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Handle for communicating with the sidecar.
#[derive(Clone)]
pub struct SidecarHandle {
    tx: mpsc::Sender<GatewayMessage>,
    connected: Arc<RwLock<bool>>,
}

impl SidecarHandle {
    /// Send a message to the sidecar.
    pub async fn send(&self, msg: GatewayMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .context("failed to send message to sidecar")
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }
}

/// Connect to the sidecar and spawn reader/writer tasks.
///
/// Parsed sidecar messages arrive on the returned receiver; it yields `None`
/// once the socket is gone.
pub async fn connect_to_sidecar(
    url: &str,
) -> Result<(SidecarHandle, mpsc::Receiver<SidecarMessage>)> {
    info!(url, "connecting to WhatsApp sidecar");

    let (ws_stream, _) = connect_async(url)
        .await
        .context("failed to connect to sidecar")?;

    info!("connected to WhatsApp sidecar");

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<GatewayMessage>(32);
    let (inbound_tx, inbound_rx) = mpsc::channel::<SidecarMessage>(64);

    let connected = Arc::new(RwLock::new(true));
    let connected_reader = Arc::clone(&connected);
    let connected_writer = Arc::clone(&connected);

    tokio::spawn(async move {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<SidecarMessage>(&text) {
                    Ok(msg) => {
                        debug!(?msg, "received message from sidecar");
                        if inbound_tx.send(msg).await.is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, text = %text, "failed to parse sidecar message");
                    },
                },
                Ok(Message::Close(_)) => {
                    info!("sidecar connection closed");
                    break;
                },
                Ok(_) => {},
                Err(e) => {
                    error!(error = %e, "WebSocket read error");
                    break;
                },
            }
        }

        *connected_reader.write().await = false;
    });

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if let Err(e) = write.send(Message::Text(json.into())).await {
                        error!(error = %e, "failed to send message to sidecar");
                        break;
                    }
                    debug!(?msg, "sent message to sidecar");
                },
                Err(e) => {
                    error!(error = %e, "failed to serialize message");
                },
            }
        }

        *connected_writer.write().await = false;
    });

    Ok((SidecarHandle { tx, connected }, inbound_rx))
}

/// Try to connect to the sidecar with retries.
pub async fn connect_with_retry(
    url: &str,
    max_retries: u32,
    retry_delay: Duration,
) -> Result<(SidecarHandle, mpsc::Receiver<SidecarMessage>)> {
    let mut attempt = 0;
    loop {
        match connect_to_sidecar(url).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(e);
                }
                warn!(
                    attempt,
                    max_retries,
                    error = %e,
                    "failed to connect to sidecar, retrying..."
                );
                tokio::time::sleep(retry_delay).await;
            },
        }
    }
}

type SendResult = std::result::Result<SendReceipt, SendError>;

struct PendingSend {
    account_id: String,
    to: String,
    tx: oneshot::Sender<SendResult>,
}

#[derive(Default)]
struct Shared {
    handle: RwLock<Option<SidecarHandle>>,
    /// Event channel of the current connection per account.
    routes: Mutex<HashMap<String, mpsc::Sender<TransportEvent>>>,
    /// Sends waiting for a `send_result`, keyed by request id.
    pending: Mutex<HashMap<String, PendingSend>>,
}

impl Shared {
    async fn ensure_connected(self: &Arc<Self>, url: &str) -> Result<SidecarHandle, TransportError> {
        let mut guard = self.handle.write().await;
        if let Some(handle) = guard.as_ref()
            && handle.is_connected().await
        {
            return Ok(handle.clone());
        }

        let (handle, inbound) = connect_with_retry(url, CONNECT_RETRIES, CONNECT_RETRY_DELAY)
            .await
            .map_err(|e| TransportError::Unavailable(format!("{e:#}")))?;
        *guard = Some(handle.clone());
        tokio::spawn(Arc::clone(self).dispatch(inbound));
        Ok(handle)
    }

    async fn dispatch(self: Arc<Self>, mut inbound: mpsc::Receiver<SidecarMessage>) {
        while let Some(msg) = inbound.recv().await {
            self.handle_message(msg).await;
        }

        warn!("sidecar connection lost, closing all sessions");
        *self.handle.write().await = None;
        let routes = std::mem::take(&mut *self.routes.lock().await);
        for (_, events) in routes {
            let _ = events
                .send(TransportEvent::Close(CloseReason::transient(
                    "sidecar connection lost",
                )))
                .await;
        }
        let pending = std::mem::take(&mut *self.pending.lock().await);
        for (_, send) in pending {
            let _ = send
                .tx
                .send(Err(SendError::Transport("sidecar connection lost".into())));
        }
    }

    async fn handle_message(&self, msg: SidecarMessage) {
        match msg {
            SidecarMessage::Qr { account_id, qr } => {
                info!(account_id = %account_id, "pairing code received");
                self.route(&account_id, TransportEvent::PairingCode(qr)).await;
            },
            SidecarMessage::Connected {
                account_id,
                phone_number,
                name,
            } => {
                let identity = phone_number
                    .as_deref()
                    .map(identity_from_jid)
                    .unwrap_or_default();
                self.route(&account_id, TransportEvent::Open {
                    identity,
                    display_name: name,
                })
                .await;
            },
            SidecarMessage::Disconnected {
                account_id,
                reason,
                status_code,
            } => {
                self.fail_pending(&account_id).await;
                self.close_route(&account_id, CloseReason::new(status_code, reason))
                    .await;
            },
            SidecarMessage::LoggedOut { account_id } => {
                self.fail_pending(&account_id).await;
                self.close_route(&account_id, CloseReason::logged_out()).await;
            },
            SidecarMessage::CredsUpdate { account_id, creds } => {
                self.route(&account_id, TransportEvent::CredentialsUpdated(creds))
                    .await;
            },
            SidecarMessage::SendResult {
                request_id,
                success,
                message_id,
                error,
            } => {
                let Some(send) = self.pending.lock().await.remove(&request_id) else {
                    debug!(request_id = %request_id, "send result for unknown request");
                    return;
                };
                let result = if success {
                    Ok(SendReceipt {
                        to: send.to,
                        message_id,
                    })
                } else {
                    Err(SendError::Rejected(
                        error.unwrap_or_else(|| "send failed".into()),
                    ))
                };
                let _ = send.tx.send(result);
            },
            SidecarMessage::Error { account_id, error } => {
                warn!(account_id = ?account_id, error = %error, "sidecar reported an error");
            },
            SidecarMessage::Ignored => {},
        }
    }

    async fn route(&self, account_id: &str, event: TransportEvent) {
        let Some(events) = self.routes.lock().await.get(account_id).cloned() else {
            debug!(account_id, "dropping event for account without a connection");
            return;
        };
        if events.send(event).await.is_err() {
            self.routes.lock().await.remove(account_id);
        }
    }

    async fn close_route(&self, account_id: &str, reason: CloseReason) {
        let events = self.routes.lock().await.remove(account_id);
        if let Some(events) = events {
            let _ = events.send(TransportEvent::Close(reason)).await;
        }
    }

    async fn fail_pending(&self, account_id: &str) {
        let mut pending = self.pending.lock().await;
        let ids: Vec<String> = pending
            .iter()
            .filter(|(_, send)| send.account_id == account_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(send) = pending.remove(&id) {
                let _ = send.tx.send(Err(SendError::NotConnected));
            }
        }
    }
}

/// [`Transport`] backed by the Baileys sidecar.
pub struct SidecarTransport {
    url: String,
    shared: Arc<Shared>,
}

impl SidecarTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shared: Arc::new(Shared::default()),
        }
    }
}

#[async_trait]
impl Transport for SidecarTransport {
    async fn open(&self, request: OpenRequest) -> Result<OpenedConnection, TransportError> {
        let handle = self.shared.ensure_connected(&self.url).await?;
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        self.shared
            .routes
            .lock()
            .await
            .insert(request.account_id.clone(), events_tx);

        let login = GatewayMessage::Login {
            account_id: request.account_id.clone(),
            auth_dir: request.auth_dir.display().to_string(),
            creds: request.credentials,
            version: request.protocol_version.0,
        };
        if let Err(e) = handle.send(login).await {
            self.shared.routes.lock().await.remove(&request.account_id);
            return Err(TransportError::Unavailable(format!("{e:#}")));
        }

        Ok(OpenedConnection {
            connection: Arc::new(SidecarConnection {
                account_id: request.account_id,
                handle,
                shared: Arc::clone(&self.shared),
            }),
            events,
        })
    }
}

struct SidecarConnection {
    account_id: String,
    handle: SidecarHandle,
    shared: Arc<Shared>,
}

#[async_trait]
impl Connection for SidecarConnection {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<SendReceipt, SendError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(request_id.clone(), PendingSend {
            account_id: self.account_id.clone(),
            to: message.to.to_string(),
            tx,
        });

        let msg = match message.media {
            Some(media) => GatewayMessage::SendMedia {
                account_id: self.account_id.clone(),
                to: message.to.to_string(),
                media_url: media.url.clone(),
                media_type: media.kind.as_str().to_string(),
                caption: (!message.body.is_empty()).then(|| message.body.to_string()),
                request_id: request_id.clone(),
            },
            None => GatewayMessage::SendText {
                account_id: self.account_id.clone(),
                to: message.to.to_string(),
                text: message.body.to_string(),
                request_id: request_id.clone(),
            },
        };

        if let Err(e) = self.handle.send(msg).await {
            self.shared.pending.lock().await.remove(&request_id);
            return Err(SendError::Transport(format!("{e:#}")));
        }

        let _pending = PendingGuard {
            shared: Arc::clone(&self.shared),
            request_id,
        };
        rx.await
            .unwrap_or_else(|_| Err(SendError::Transport("sidecar dropped the request".into())))
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.shared.fail_pending(&self.account_id).await;
        self.shared.routes.lock().await.remove(&self.account_id);
        self.handle
            .send(GatewayMessage::Logout {
                account_id: self.account_id.clone(),
            })
            .await
            .map_err(|e| TransportError::Unavailable(format!("{e:#}")))
    }

    async fn close(&self) {
        self.shared.routes.lock().await.remove(&self.account_id);
        if let Err(e) = self
            .handle
            .send(GatewayMessage::Disconnect {
                account_id: self.account_id.clone(),
            })
            .await
        {
            debug!(account_id = %self.account_id, error = %e, "failed to send disconnect");
        }
    }
}

/// Drops the pending entry when the sender stops waiting early, e.g. on a
/// timeout. Best effort: a contended map is cleaned up by the late result.
struct PendingGuard {
    shared: Arc<Shared>,
    request_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.shared.pending.try_lock() {
            pending.remove(&self.request_id);
        }
    }
}
