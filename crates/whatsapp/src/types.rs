//! Wire messages exchanged with the WhatsApp Baileys sidecar.

use serde::{Deserialize, Serialize};

use crate::auth::Credentials;

/// Messages sent from the engine to the sidecar.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Login {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "authDir")]
        auth_dir: String,
        /// Stored credentials to resume with; absent for a fresh pairing.
        #[serde(skip_serializing_if = "Option::is_none")]
        creds: Option<Credentials>,
        /// Pinned web client version, e.g. `[2, 2413, 1]`.
        version: [u32; 3],
    },
    Logout {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    /// Close the socket without unlinking the device.
    Disconnect {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    SendText {
        #[serde(rename = "accountId")]
        account_id: String,
        to: String,
        text: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    SendMedia {
        #[serde(rename = "accountId")]
        account_id: String,
        to: String,
        #[serde(rename = "mediaUrl")]
        media_url: String,
        #[serde(rename = "mediaType")]
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

/// Messages received from the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        #[serde(rename = "accountId")]
        account_id: String,
        qr: String,
    },
    Connected {
        #[serde(rename = "accountId")]
        account_id: String,
        /// Full JID of the linked device.
        #[serde(rename = "phoneNumber")]
        phone_number: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    Disconnected {
        #[serde(rename = "accountId")]
        account_id: String,
        reason: String,
        #[serde(default, rename = "statusCode")]
        status_code: Option<u16>,
    },
    LoggedOut {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    CredsUpdate {
        #[serde(rename = "accountId")]
        account_id: String,
        creds: Credentials,
    },
    SendResult {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(rename = "messageId")]
        message_id: Option<String>,
        error: Option<String>,
    },
    Error {
        #[serde(rename = "accountId")]
        account_id: Option<String>,
        error: String,
    },
    /// Inbound chat traffic and status chatter the engine does not consume.
    #[serde(other)]
    Ignored,
}
