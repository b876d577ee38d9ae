//! Outbound send capability.

use std::time::Duration;

use {async_trait::async_trait, serde::Serialize};

use crate::types::MediaRef;

/// Why a single send attempt failed.
///
/// Every variant is a per-recipient failure: the campaign worker records it
/// and moves on to the next recipient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("WhatsApp not connected")]
    NotConnected,

    #[error("invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("send rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Acknowledgement for a message handed to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    /// Normalized address the message went to.
    pub to: String,
    pub message_id: Option<String>,
}

/// Sends messages on behalf of an account.
///
/// Implemented by the session manager; the campaign worker only ever holds
/// this trait, never a connection.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(
        &self,
        account_id: &str,
        to: &str,
        body: &str,
        media: Option<&MediaRef>,
    ) -> Result<SendReceipt, SendError>;

    /// Whether the account currently has a connected session.
    async fn is_connected(&self, account_id: &str) -> bool;
}
