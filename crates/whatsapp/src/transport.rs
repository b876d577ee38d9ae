//! Seam between the session manager and the wire protocol.
//!
//! The session manager never speaks the protocol itself. It opens a
//! [`Connection`] through a [`Transport`] and consumes the connection's
//! lifecycle as [`TransportEvent`]s on an mpsc channel.

use std::{path::PathBuf, sync::Arc};

use {
    async_trait::async_trait,
    bulkwa_common::{MediaRef, SendError, SendReceipt},
    tokio::sync::mpsc,
};

use crate::{auth::Credentials, config::ProtocolVersion, error::TransportError};

/// Buffer size of the per-connection event channel.
pub const EVENT_BUFFER: usize = 32;

/// Everything a transport needs to open a connection for one account.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub account_id: String,
    pub auth_dir: PathBuf,
    /// Stored credentials, `None` for a fresh pairing.
    pub credentials: Option<Credentials>,
    pub protocol_version: ProtocolVersion,
}

pub struct OpenedConnection {
    pub connection: Arc<dyn Connection>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A pairing code to be rendered as a QR code.
    PairingCode(String),
    /// The connection is authenticated. `identity` is the bare phone number.
    Open {
        identity: String,
        display_name: Option<String>,
    },
    Close(CloseReason),
    /// Partial credential object to merge into the stored state.
    CredentialsUpdated(Credentials),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// The device was unlinked. Terminal.
    LoggedOut,
    /// The server refused the pinned client version.
    VersionMismatch,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub status_code: Option<u16>,
    pub message: String,
}

impl CloseReason {
    pub const LOGGED_OUT: u16 = 401;
    pub const VERSION_MISMATCH: u16 = 405;

    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn logged_out() -> Self {
        Self::new(Some(Self::LOGGED_OUT), "logged out")
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    pub fn kind(&self) -> DisconnectKind {
        match self.status_code {
            Some(Self::LOGGED_OUT) => DisconnectKind::LoggedOut,
            Some(Self::VERSION_MISMATCH) => DisconnectKind::VersionMismatch,
            _ => DisconnectKind::Transient,
        }
    }
}

/// A message ready for the wire. `to` is already a JID.
#[derive(Debug, Clone, Copy)]
pub struct OutboundMessage<'a> {
    pub to: &'a str,
    pub body: &'a str,
    pub media: Option<&'a MediaRef>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: OpenRequest) -> Result<OpenedConnection, TransportError>;
}

/// One live connection for one account.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send(&self, message: OutboundMessage<'_>) -> Result<SendReceipt, SendError>;

    /// Unlink the device. The connection is unusable afterwards.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Drop the connection without unlinking.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_classification() {
        assert_eq!(CloseReason::logged_out().kind(), DisconnectKind::LoggedOut);
        assert_eq!(
            CloseReason::new(Some(405), "Connection Failure").kind(),
            DisconnectKind::VersionMismatch
        );
        assert_eq!(
            CloseReason::new(Some(428), "Connection Closed").kind(),
            DisconnectKind::Transient
        );
        assert_eq!(CloseReason::transient("stream ended").kind(), DisconnectKind::Transient);
    }
}
