//! Session and campaign records.

use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Lifecycle state of an account's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Uninitialized,
    Initializing,
    WaitingPairing,
    Connected,
    Disconnected,
    LoggedOut,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::WaitingPairing => "waiting_pairing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::LoggedOut => "logged_out",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = InvalidRecord;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uninitialized" => Ok(Self::Uninitialized),
            "initializing" => Ok(Self::Initializing),
            // Older rows written by the node engine used `waiting_qr`.
            "waiting_pairing" | "waiting_qr" => Ok(Self::WaitingPairing),
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            "logged_out" => Ok(Self::LoggedOut),
            other => Err(InvalidRecord(format!("unknown session status: {other}"))),
        }
    }
}

/// A record that violates the session or campaign invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid record: {0}")]
pub struct InvalidRecord(pub String);

/// Persisted view of one account's session.
///
/// Fields are private so the pairing code can only exist while waiting for a
/// scan and the identity only while connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    account_id: String,
    status: SessionStatus,
    pairing_code: Option<String>,
    identity: Option<String>,
    updated_at: DateTime<Utc>,
}

impl SessionRecord {
    fn with_status(account_id: &str, status: SessionStatus) -> Self {
        Self {
            account_id: account_id.to_string(),
            status,
            pairing_code: None,
            identity: None,
            updated_at: Utc::now(),
        }
    }

    pub fn uninitialized(account_id: &str) -> Self {
        Self::with_status(account_id, SessionStatus::Uninitialized)
    }

    pub fn initializing(account_id: &str) -> Self {
        Self::with_status(account_id, SessionStatus::Initializing)
    }

    pub fn waiting_pairing(account_id: &str, pairing_code: impl Into<String>) -> Self {
        Self {
            pairing_code: Some(pairing_code.into()),
            ..Self::with_status(account_id, SessionStatus::WaitingPairing)
        }
    }

    pub fn connected(account_id: &str, identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            ..Self::with_status(account_id, SessionStatus::Connected)
        }
    }

    pub fn disconnected(account_id: &str) -> Self {
        Self::with_status(account_id, SessionStatus::Disconnected)
    }

    pub fn logged_out(account_id: &str) -> Self {
        Self::with_status(account_id, SessionStatus::LoggedOut)
    }

    /// Rebuild a record read back from storage, rejecting rows that break
    /// the pairing-code or identity invariants.
    pub fn restore(
        account_id: String,
        status: SessionStatus,
        pairing_code: Option<String>,
        identity: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, InvalidRecord> {
        if pairing_code.is_some() && status != SessionStatus::WaitingPairing {
            return Err(InvalidRecord(format!(
                "session {account_id}: pairing code present in status {status}"
            )));
        }
        if identity.is_some() != (status == SessionStatus::Connected) {
            return Err(InvalidRecord(format!(
                "session {account_id}: identity must be set iff connected (status {status})"
            )));
        }
        Ok(Self {
            account_id,
            status,
            pairing_code,
            identity,
            updated_at,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn pairing_code(&self) -> Option<&str> {
        self.pairing_code.as_deref()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Delivery state of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Scheduled,
    Processing,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and Failed campaigns are never touched again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = InvalidRecord;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "scheduled" => Ok(Self::Scheduled),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(InvalidRecord(format!("unknown campaign status: {other}"))),
        }
    }
}

/// A bulk-send job.
///
/// `recipients` keeps the descriptors exactly as submitted (an array, or a
/// string holding a JSON array); the worker parses them when it claims the
/// campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub account_id: String,
    pub recipients: serde_json::Value,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    pub pacing_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_at: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
    #[serde(default)]
    pub sent_count: u32,
    #[serde(default)]
    pub failed_count: u32,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Number of recipients already attempted. Delivery resumes from here.
    pub fn attempted(&self) -> usize {
        (self.sent_count + self.failed_count) as usize
    }
}

/// Kind of media attached to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// Media reference sent alongside (or instead of) the text body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
}

impl MediaRef {
    /// Build a reference, inferring the kind from the URL's file extension.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let file = path.rsplit('/').next().unwrap_or_default();
        let ext = file
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let kind = match ext.as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "gif" => MediaKind::Image,
            "mp4" | "mov" | "3gp" | "webm" => MediaKind::Video,
            "mp3" | "ogg" | "opus" | "m4a" | "aac" | "wav" => MediaKind::Audio,
            _ => MediaKind::Document,
        };
        Self { url, kind }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn pairing_code_only_while_waiting() {
        let waiting = SessionRecord::waiting_pairing("u1", "2@abc");
        assert_eq!(waiting.pairing_code(), Some("2@abc"));
        assert!(waiting.identity().is_none());

        let connected = SessionRecord::connected("u1", "15551234567");
        assert!(connected.pairing_code().is_none());
        assert_eq!(connected.identity(), Some("15551234567"));
    }

    #[test]
    fn restore_rejects_broken_rows() {
        let now = Utc::now();
        assert!(
            SessionRecord::restore(
                "u1".into(),
                SessionStatus::Connected,
                Some("code".into()),
                Some("1555".into()),
                now,
            )
            .is_err()
        );
        assert!(
            SessionRecord::restore("u1".into(), SessionStatus::Connected, None, None, now)
                .is_err()
        );
        assert!(
            SessionRecord::restore(
                "u1".into(),
                SessionStatus::Disconnected,
                None,
                Some("1555".into()),
                now,
            )
            .is_err()
        );
        let ok = SessionRecord::restore(
            "u1".into(),
            SessionStatus::WaitingPairing,
            Some("code".into()),
            None,
            now,
        )
        .unwrap();
        assert_eq!(ok.status(), SessionStatus::WaitingPairing);
    }

    #[test]
    fn legacy_waiting_qr_status_parses() {
        assert_eq!(
            "waiting_qr".parse::<SessionStatus>().unwrap(),
            SessionStatus::WaitingPairing
        );
        assert!("bogus".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn media_kind_from_extension() {
        assert_eq!(
            MediaRef::from_url("https://cdn.example.com/promo.JPG?sig=1").kind,
            MediaKind::Image
        );
        assert_eq!(
            MediaRef::from_url("https://cdn.example.com/clip.mp4").kind,
            MediaKind::Video
        );
        assert_eq!(
            MediaRef::from_url("https://cdn.example.com/voice.ogg").kind,
            MediaKind::Audio
        );
        assert_eq!(
            MediaRef::from_url("https://cdn.example.com/price-list.pdf").kind,
            MediaKind::Document
        );
        assert_eq!(
            MediaRef::from_url("https://cdn.example.com/download").kind,
            MediaKind::Document
        );
    }
}
