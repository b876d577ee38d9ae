use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    bulkwa_campaigns::CampaignConfig,
    bulkwa_whatsapp::WhatsAppConfig,
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkwaConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub whatsapp: WhatsAppConfig,
    pub campaigns: CampaignConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 2008,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite URL. Defaults to `bulkwa.db` in the data directory.
    pub database_url: Option<String>,
}

impl StoreConfig {
    pub fn database_url(&self, data_dir: &Path) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite://{}", data_dir.join("bulkwa.db").display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl BulkwaConfig {
    /// Credential directory for WhatsApp sessions.
    pub fn auth_root(&self, data_dir: &Path) -> PathBuf {
        self.whatsapp.auth_root(data_dir)
    }
}
