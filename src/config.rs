//! Node configuration with defaults and environment overrides.

use std::collections::HashSet;
use std::path::PathBuf;

/// Default leader heartbeat interval; the checker multiplies it by 1.3
/// to get the takeover threshold.
pub const DEFAULT_HEARTBEAT_DELAY_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the local storage files.
    pub data_dir: PathBuf,

    /// Name of the storage this node serves.
    pub storage_name: String,

    /// Base leader heartbeat interval in milliseconds.
    pub heartbeat_delay_ms: u64,

    /// Cluster names served locally regardless of ring placement.
    pub undistributable_clusters: HashSet<String>,

    /// Maximum accepted HTTP body size.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./autoshard_data"),
            storage_name: "default".to_string(),
            heartbeat_delay_ms: DEFAULT_HEARTBEAT_DELAY_MS,
            undistributable_clusters: ["internal", "index"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_body_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Defaults overridden by `DATA_DIR`, `STORAGE_NAME`,
    /// `HEARTBEAT_DELAY_MS`, `UNDISTRIBUTABLE_CLUSTERS` (comma separated)
    /// and `MAX_BODY_BYTES`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("STORAGE_NAME") {
            config.storage_name = value;
        }
        if let Some(value) = std::env::var("HEARTBEAT_DELAY_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.heartbeat_delay_ms = value;
        }
        if let Ok(value) = std::env::var("UNDISTRIBUTABLE_CLUSTERS") {
            config.undistributable_clusters = value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = std::env::var("MAX_BODY_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
        {
            config.max_body_bytes = value;
        }

        config
    }
}
