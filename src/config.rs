use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_HISTORY_LIMIT;

/// Server used when neither the config file nor the command line names one.
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

/// Client config, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the monitoring backend (scheme, host, port).
    #[serde(default = "default_server")]
    pub server: String,
    /// Seconds between full refetches while watching. 0 disables refetching.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Push-channel section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Path of the push endpoint on the server.
    #[serde(default = "default_live_path")]
    pub path: String,
    /// Fixed delay between a lost connection and the next attempt. Must be
    /// greater than 0.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Seconds between keepalive pings. 0 disables pings.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

/// Cache section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Checks kept per environment.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_live_path() -> String {
    "/ws".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: default_server(),
            refresh_interval_secs: default_refresh_interval_secs(),
            live: LiveConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            path: default_live_path(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

impl Config {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate(path)?;
        Ok(Some(config))
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    /// Save config to a TOML file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if !(self.server.starts_with("http://") || self.server.starts_with("https://")) {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                format!("server must be an http:// or https:// URL, got '{}'", self.server),
            ));
        }
        if self.live.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "live.reconnect_delay_ms must be greater than 0".to_string(),
            ));
        }
        if !self.live.path.starts_with('/') {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                format!("live.path must start with '/', got '{}'", self.live.path),
            ));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.live.reconnect_delay_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.live.ping_interval_secs > 0).then(|| Duration::from_secs(self.live.ping_interval_secs))
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

/// Default config file location: `<config dir>/svcpulse/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("svcpulse")
        .join("config.toml")
}

/// Errors that can occur when loading or saving config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    WriteFailed(PathBuf, std::io::Error),
    SerializeFailed(toml::ser::Error),
    Invalid(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::WriteFailed(path, e) => {
                write!(f, "Failed to write config {}: {}", path.display(), e)
            }
            Self::SerializeFailed(e) => write!(f, "Failed to serialize config: {}", e),
            Self::Invalid(path, detail) => {
                write!(f, "Invalid config {}: {}", path.display(), detail)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
