//! Configuration management for the Byte-Watt bridge
//!
//! This module handles loading, validation, and management of the bridge
//! configuration from YAML files with support for environment variable
//! overrides of the account credentials.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod defaults;
pub use defaults::DEFAULT_BASE_URL;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "BYTEWATT_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Vendor cloud account
    pub account: AccountConfig,

    /// Poll loop cadence
    pub poll: PollConfig,

    /// Retry/backoff policy shared by poller and settings synchronizer
    pub retry: RetryConfig,

    /// Health monitor thresholds
    pub health: HealthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// HTTP control API binding
    pub web: WebConfig,
}

/// Vendor cloud account and endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Login name at the vendor portal
    pub username: String,

    /// Portal password; never written back when served over HTTP
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// API base URL
    pub base_url: String,

    /// Optional station id; empty means all systems of the account
    pub station_id: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Refresh the token proactively after this many seconds (0 = only on rejection)
    pub session_max_age_secs: u64,
}

/// Poll loop cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Interval between realtime fetches in milliseconds
    pub interval_ms: u64,

    /// Fetch energy statistics, daily totals and settings every Nth cycle
    pub statistics_every: u32,

    /// Allowed backwards jitter of cumulative counters in kWh
    pub statistics_tolerance_kwh: f64,
}

/// Retry/backoff policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per request including the first one
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds
    pub max_delay_ms: u64,

    /// Randomize delays to avoid synchronized retries
    pub jitter: bool,
}

/// Health monitor thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failed cycles after which status becomes Failed
    pub failure_threshold: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file (its directory receives the rolling files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Serve the HTTP control API
    pub enabled: bool,

    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl AccountConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_max_age(&self) -> Option<Duration> {
        (self.session_max_age_secs > 0).then(|| Duration::from_secs(self.session_max_age_secs))
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first existing default location,
    /// then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::load_default_locations()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_default_locations() -> Result<Self> {
        let default_paths = [
            "bytewatt_config.yaml",
            "/data/bytewatt_config.yaml",
            "/etc/bytewatt/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Credentials usually come from the environment in container setups
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BYTEWATT_USERNAME")
            && !v.is_empty()
        {
            self.account.username = v;
        }
        if let Ok(v) = std::env::var("BYTEWATT_PASSWORD")
            && !v.is_empty()
        {
            self.account.password = v;
        }
        if let Ok(v) = std::env::var("BYTEWATT_BASE_URL")
            && !v.is_empty()
        {
            self.account.base_url = v;
        }
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Copy of the configuration that is safe to expose over HTTP
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.account.password.clear();
        copy
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.account.username.trim().is_empty() {
            return Err(BridgeError::validation(
                "account.username",
                "Username cannot be empty",
            ));
        }

        if self.account.password.is_empty() {
            return Err(BridgeError::validation(
                "account.password",
                "Password cannot be empty",
            ));
        }

        if !(self.account.base_url.starts_with("http://")
            || self.account.base_url.starts_with("https://"))
        {
            return Err(BridgeError::validation(
                "account.base_url",
                "Must be an http(s) URL",
            ));
        }

        if self.account.request_timeout_secs == 0 {
            return Err(BridgeError::validation(
                "account.request_timeout_secs",
                "Must be greater than 0",
            ));
        }

        if self.poll.interval_ms == 0 {
            return Err(BridgeError::validation(
                "poll.interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.poll.statistics_every == 0 {
            return Err(BridgeError::validation(
                "poll.statistics_every",
                "Must be at least 1",
            ));
        }

        if !self.poll.statistics_tolerance_kwh.is_finite()
            || self.poll.statistics_tolerance_kwh < 0.0
        {
            return Err(BridgeError::validation(
                "poll.statistics_tolerance_kwh",
                "Must be a non-negative number",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(BridgeError::validation(
                "retry.max_attempts",
                "Must be at least 1",
            ));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(BridgeError::validation(
                "retry.max_delay_ms",
                "Must not be lower than retry.base_delay_ms",
            ));
        }

        if self.health.failure_threshold == 0 {
            return Err(BridgeError::validation(
                "health.failure_threshold",
                "Must be at least 1",
            ));
        }

        if self.web.enabled && self.web.port == 0 {
            return Err(BridgeError::validation(
                "web.port",
                "Port must be greater than 0",
            ));
        }

        Ok(())
    }
}
