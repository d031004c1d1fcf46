//! Configuration module for feedwatch.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{FeedwatchError, Result};

/// Storage backend names accepted in `[database] backend`.
const BACKENDS: &[&str] = &["sqlite", "memory"];

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Storage backend ("sqlite" or "memory").
    #[serde(default = "default_db_backend")]
    pub backend: String,
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_backend() -> String {
    "sqlite".to_string()
}

fn default_db_path() -> String {
    "data/feedwatch.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedwatch.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Feed monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between polling cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound for a single feed retrieval, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Number of distinct URLs fetched concurrently within one cycle.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// User-Agent header sent with every retrieval.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Skip never-seen items published before the ledger's high-watermark.
    #[serde(default)]
    pub use_watermark: bool,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_concurrent_fetches() -> usize {
    4
}

// Some feed hosts reject non-browser clients.
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_4) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/83.0.4103.97 Safari/537.36"
        .to_string()
}

impl MonitorConfig {
    /// Polling interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Per-fetch timeout as a duration.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            user_agent: default_user_agent(),
            use_watermark: false,
        }
    }
}

/// Delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum characters per delivered message.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Subscriber ID used by the console transport.
    #[serde(default)]
    pub subscriber_id: i64,
}

fn default_max_message_chars() -> usize {
    4096
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            subscriber_id: 0,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Feed monitor configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Delivery configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedwatchError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedwatchError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDWATCH_DATABASE_PATH`: Override the SQLite database path
    /// - `FEEDWATCH_LOG_LEVEL`: Override the log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FEEDWATCH_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(level) = std::env::var("FEEDWATCH_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !BACKENDS.contains(&self.database.backend.as_str()) {
            return Err(FeedwatchError::Config(format!(
                "unknown database backend: {}",
                self.database.backend
            )));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(FeedwatchError::Config(
                "monitor.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.monitor.fetch_timeout_secs == 0 {
            return Err(FeedwatchError::Config(
                "monitor.fetch_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.monitor.max_concurrent_fetches == 0 {
            return Err(FeedwatchError::Config(
                "monitor.max_concurrent_fetches must be greater than 0".to_string(),
            ));
        }
        if self.delivery.max_message_chars == 0 {
            return Err(FeedwatchError::Config(
                "delivery.max_message_chars must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
