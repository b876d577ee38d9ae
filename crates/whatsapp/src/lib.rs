//! WhatsApp session management for bulkwa.
//!
//! The [`SessionManager`] owns one session per account: it pairs new devices,
//! keeps connections alive across transient drops, tears them down on logout
//! and exposes the send capability the campaign worker uses. The wire
//! protocol lives behind the [`Transport`] trait; [`SidecarTransport`] speaks
//! to a Node.js Baileys sidecar over WebSocket.

pub mod auth;
pub mod config;
pub mod error;
pub mod jid;
pub mod manager;
pub mod registry;
pub mod sidecar;
pub mod state;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use {
    auth::{AuthStore, Credentials},
    config::{ProtocolVersion, ReconnectPolicy, WhatsAppConfig},
    error::{AuthError, SessionError, TransportError},
    manager::{CreateOutcome, SessionManager, SessionStatusView},
    registry::SessionRegistry,
    sidecar::SidecarTransport,
    state::{SessionMachine, SessionSnapshot},
    transport::{
        CloseReason, Connection, DisconnectKind, OpenRequest, OpenedConnection, OutboundMessage,
        Transport, TransportEvent,
    },
};
