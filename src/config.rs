//! Configuration file parser for ~/.config/feedmill/config.toml.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted but logged, since they are
//! usually typos. `FEEDMILL_DATABASE_PATH` and `FEEDMILL_PROXY_URL` override
//! the file.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FullTextProxy, DEFAULT_MAX_BYTES, DEFAULT_PROXY_URL, DEFAULT_TIMEOUT};
use crate::ingest::DEFAULT_POLL_INTERVAL;

pub const ENV_DATABASE_PATH: &str = "FEEDMILL_DATABASE_PATH";
pub const ENV_PROXY_URL: &str = "FEEDMILL_PROXY_URL";

const KNOWN_KEYS: &[&str] = &[
    "database_path",
    "poll_interval_seconds",
    "full_text_proxy",
    "default_feed_size",
    "request_timeout_seconds",
    "max_feed_bytes",
    "allow_private_hosts",
    "log_level",
];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Runtime configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. `None` uses `feedmill.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Seconds between ingestion cycles.
    pub poll_interval_seconds: u64,

    /// Full-text extraction endpoint. Empty disables the proxy.
    pub full_text_proxy: String,

    /// Window size (max items) for new subscriptions.
    pub default_feed_size: i64,

    pub request_timeout_seconds: u64,

    /// Largest accepted feed document, in bytes.
    pub max_feed_bytes: usize,

    /// Allow subscribing to loopback and private-network hosts.
    pub allow_private_hosts: bool,

    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL.as_secs(),
            full_text_proxy: DEFAULT_PROXY_URL.to_string(),
            default_feed_size: 4,
            request_timeout_seconds: DEFAULT_TIMEOUT.as_secs(),
            max_feed_bytes: DEFAULT_MAX_BYTES,
            allow_private_hosts: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// Environment overrides are not applied here; see [`Config::apply_env`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply `FEEDMILL_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|p| !p.trim().is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        // An empty value is meaningful: it disables the proxy
        if let Some(proxy) = lookup(ENV_PROXY_URL) {
            self.full_text_proxy = proxy;
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_seconds < 1 {
            return Err(ConfigError::Invalid(
                "poll_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.default_feed_size < 1 {
            return Err(ConfigError::Invalid(
                "default_feed_size must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_seconds < 1 {
            return Err(ConfigError::Invalid(
                "request_timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.max_feed_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_feed_bytes must be greater than 0".to_string(),
            ));
        }
        self.proxy()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn proxy(&self) -> Result<FullTextProxy, ConfigError> {
        FullTextProxy::new(&self.full_text_proxy).map_err(|e| {
            ConfigError::Invalid(format!(
                "full_text_proxy {:?} is not a valid URL: {}",
                self.full_text_proxy, e
            ))
        })
    }

    /// The configured database path, or `feedmill.db` under `config_dir`.
    pub fn database_path_in(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feedmill.db"))
    }
}

// ============================================================================
// Tests
// ============================================================================
