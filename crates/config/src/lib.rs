//! Configuration for the bulkwa engine.
//!
//! Loaded from `bulkwa.toml` (or `.yaml`/`.yml`) in the platform config
//! directory, then overridden from the environment.

pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, config_dir, data_dir, default_config_path, load, load_from_path,
        parse,
    },
    schema::{BulkwaConfig, HeartbeatConfig, ServerConfig, StoreConfig},
};
