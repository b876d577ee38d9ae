//! Campaign delivery for bulkwa.
//!
//! A campaign fans one message template out to an ordered list of
//! recipients through an account's session, pacing the sends and recording
//! progress after every attempt.

pub mod active;
pub mod config;
pub mod error;
pub mod progress;
pub mod recipients;
pub mod worker;

pub use {
    active::ActiveCampaigns,
    config::CampaignConfig,
    error::CampaignError,
    recipients::Recipient,
    worker::{CampaignWorker, NewCampaign},
};
