//! Types shared by the bulkwa crates: session and campaign records plus the
//! outbound send capability the campaign worker consumes.

pub mod outbound;
pub mod types;

pub use {
    outbound::{MessageSender, SendError, SendReceipt},
    types::{
        Campaign, CampaignStatus, InvalidRecord, MediaKind, MediaRef, SessionRecord,
        SessionStatus,
    },
};
