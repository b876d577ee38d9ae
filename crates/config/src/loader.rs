use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result, bail},
    directories::ProjectDirs,
    tracing::{debug, info},
};

use crate::schema::BulkwaConfig;

const CONFIG_FILES: [&str; 3] = ["bulkwa.toml", "bulkwa.yaml", "bulkwa.yml"];

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "bulkwa", "bulkwa")
}

/// Platform config directory, `./.bulkwa` when none can be determined.
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".bulkwa"))
}

/// Platform data directory, `./.bulkwa` when none can be determined.
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".bulkwa"))
}

/// First existing config file in the config directory.
pub fn default_config_path() -> Option<PathBuf> {
    let dir = config_dir();
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Parse config text; `extension` picks the format (`toml`, `yaml`, `yml`).
pub fn parse(content: &str, extension: &str) -> Result<BulkwaConfig> {
    match extension {
        "toml" => toml::from_str(content).context("invalid TOML config"),
        "yaml" | "yml" => serde_yaml::from_str(content).context("invalid YAML config"),
        other => bail!("unsupported config format: {other}"),
    }
}

pub fn load_from_path(path: &Path) -> Result<BulkwaConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml");
    let config = parse(&content, extension)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Load the config file (explicit path, or the default location if one
/// exists, or built-in defaults) and apply environment overrides.
pub fn load(path: Option<&Path>) -> Result<BulkwaConfig> {
    let mut config = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => load_from_path(&path)?,
        None => {
            debug!("no config file found, using defaults");
            BulkwaConfig::default()
        },
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Override config values from environment variables.
///
/// `lookup` resolves a variable name; the binary passes `std::env::var`.
pub fn apply_env_overrides(
    config: &mut BulkwaConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(port) = lookup("PORT") {
        config.server.port = port
            .trim()
            .parse()
            .with_context(|| format!("invalid PORT: {port:?}"))?;
    }
    if let Some(bind) = lookup("BULKWA_BIND") {
        config.server.bind = bind;
    }
    if let Some(url) = lookup("DATABASE_URL") {
        config.store.database_url = Some(url);
    }
    if let Some(url) = lookup("BULKWA_SIDECAR_URL") {
        config.whatsapp.sidecar_url = url;
    }
    if let Some(dir) = lookup("BULKWA_AUTH_DIR") {
        config.whatsapp.auth_dir = Some(PathBuf::from(dir));
    }
    Ok(())
}
