use bulkwa_store::StoreError;

/// Errors that end a campaign (or reject a submission) as a whole.
///
/// Per-recipient send failures are not errors at this level; they are
/// counted and the campaign moves on.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("invalid campaign: {0}")]
    Invalid(String),

    #[error("malformed recipients: {0}")]
    MalformedRecipients(String),

    #[error("WhatsApp not connected")]
    NotConnected,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = CampaignError> = std::result::Result<T, E>;
