//! Persistence for session, campaign and heartbeat records.
//!
//! The engine only talks to the traits in this crate. [`SqliteStore`] is the
//! production backend; [`MemoryStore`] backs tests and `--memory` runs.

pub mod campaign;
pub mod error;
pub mod heartbeat;
pub mod memory;
pub mod session;
pub mod sqlite;

pub use {
    campaign::CampaignStore,
    error::{StoreError, StoreResult},
    heartbeat::{Heartbeat, HeartbeatStore},
    memory::MemoryStore,
    session::SessionStore,
    sqlite::SqliteStore,
};

/// Maximum number of campaigns returned by one discovery query.
pub const DEFAULT_PAGE_SIZE: usize = 10;
