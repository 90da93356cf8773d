// Local client configuration.
//
// Global config: `~/.easel/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::lock::DEFAULT_LOCK_TIMEOUT_MS;
use crate::presence::{
    DEFAULT_CURSOR_INTERVAL_MS, DEFAULT_CURSOR_MIN_DELTA, DEFAULT_PRESENCE_TIMEOUT_MS,
};

/// Root directory for Easel client state: `~/.easel/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".easel"))
}

/// Path to the client config file: `~/.easel/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|dir| dir.join("config.toml"))
}

/// Client configuration at `~/.easel/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Relay server URL (e.g. `wss://relay.easel.dev/v1/ws`).
    pub relay_url: Option<String>,
    /// Display name for this user.
    pub display_name: Option<String>,
    /// Timing knobs for locks, presence, and cursor publication.
    pub sync: SyncTuning,
}

/// Timing knobs for the sync engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncTuning {
    /// Advisory lock TTL in milliseconds.
    pub lock_timeout_ms: i64,
    /// Liveness threshold for presence records.
    pub presence_timeout_ms: i64,
    /// Minimum interval between cursor publications (~30 Hz ceiling).
    pub cursor_interval_ms: i64,
    /// Minimum cursor movement before a publication is worth sending.
    pub cursor_min_delta: f64,
    /// Lock-expiry sweep cadence. Half the lock TTL keeps the visible
    /// staleness window bounded.
    pub sweep_interval_ms: i64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            presence_timeout_ms: DEFAULT_PRESENCE_TIMEOUT_MS,
            cursor_interval_ms: DEFAULT_CURSOR_INTERVAL_MS,
            cursor_min_delta: DEFAULT_CURSOR_MIN_DELTA,
            sweep_interval_ms: DEFAULT_LOCK_TIMEOUT_MS / 2,
        }
    }
}

impl EngineConfig {
    /// Load from `~/.easel/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|path| Self::load_from(&path).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to `~/.easel/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
            }
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Errors from reading or writing config files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(std::io::Error),
    #[error("config parse error: {0}")]
    Parse(toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(toml::ser::Error),
}
