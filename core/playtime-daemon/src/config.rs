//! Daemon configuration file (`~/.playtime/daemon.toml`).
//!
//! Every section and key is optional. A missing file yields defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use playtime_core::{
    Trackable, TrackerConfig, DEFAULT_CATALOG_TTL_SECS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_SNAPSHOT_TIMEOUT_SECS, DEFAULT_STOP_FLUSH_TIMEOUT_SECS,
};
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "daemon.toml";
pub const DB_FILE_NAME: &str = "playtime.db";
const DATA_DIR_NAME: &str = ".playtime";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub tracker: TrackerSection,
    pub storage: StorageSection,
    /// Catalog entries mirrored into the database at startup.
    pub trackables: Vec<Trackable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    pub poll_interval_secs: u64,
    /// Defaults to two poll intervals when omitted.
    pub session_timeout_secs: Option<u64>,
    pub catalog_ttl_secs: u64,
    pub snapshot_timeout_secs: u64,
    pub stop_flush_timeout_secs: u64,
    pub auto_discover: bool,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            session_timeout_secs: None,
            catalog_ttl_secs: DEFAULT_CATALOG_TTL_SECS,
            snapshot_timeout_secs: DEFAULT_SNAPSHOT_TIMEOUT_SECS,
            stop_flush_timeout_secs: DEFAULT_STOP_FLUSH_TIMEOUT_SECS,
            auto_discover: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub db_path: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn tracker_config(&self) -> TrackerConfig {
        let section = &self.tracker;
        let poll_interval = Duration::from_secs(section.poll_interval_secs);
        TrackerConfig {
            poll_interval,
            session_timeout: section
                .session_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(poll_interval * 2),
            catalog_ttl: Duration::from_secs(section.catalog_ttl_secs),
            snapshot_timeout: Duration::from_secs(section.snapshot_timeout_secs),
            stop_flush_timeout: Duration::from_secs(section.stop_flush_timeout_secs),
            auto_discover: section.auto_discover,
        }
    }

    /// Database location: explicit override, then config, then the default.
    pub fn db_path(&self, override_path: Option<PathBuf>) -> Result<PathBuf, String> {
        match override_path.or_else(|| self.storage.db_path.clone()) {
            Some(path) => Ok(path),
            None => Ok(data_dir()?.join(DB_FILE_NAME)),
        }
    }
}

pub fn data_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DATA_DIR_NAME))
}

pub fn default_config_path() -> Result<PathBuf, String> {
    Ok(data_dir()?.join(CONFIG_FILE_NAME))
}

pub fn load_config(path: Option<&Path>) -> Result<DaemonConfig, String> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read daemon config {}: {}",
            config_path.display(),
            err
        )
    })?;
    toml::from_str::<DaemonConfig>(&content).map_err(|err| {
        format!(
            "Failed to parse daemon config {}: {}",
            config_path.display(),
            err
        )
    })
}
