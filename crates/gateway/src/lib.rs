//! HTTP API of the bulkwa engine.
//!
//! Thin axum handlers over the session manager and the campaign worker,
//! plus the liveness heartbeat.

pub mod campaign_routes;
pub mod error;
pub mod heartbeat;
pub mod qr;
pub mod server;
pub mod session_routes;
pub mod state;

pub use {
    error::ApiError,
    heartbeat::spawn_heartbeat,
    server::{build_router, serve},
    state::AppState,
};
