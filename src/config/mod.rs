//! Configuration management for product-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Remote catalog API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Retry backoff configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Client-side rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Synchronization run configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix PRODUCT_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(url) = std::env::var("PRODUCT_SYNC_API_BASE_URL") {
            config.api.base_url = url;
        }
        if let Some(timeout) = parse_env::<u64>("PRODUCT_SYNC_API_TIMEOUT")? {
            config.api.timeout_secs = timeout;
        }
        if let Some(retries) = parse_env::<u32>("PRODUCT_SYNC_API_MAX_RETRIES")? {
            config.api.max_retries = retries;
        }
        if let Some(rate) = parse_env::<f64>("PRODUCT_SYNC_RATE_LIMIT")? {
            config.rate_limit.requests_per_second = rate;
        }
        if let Ok(enabled) = std::env::var("PRODUCT_SYNC_AUTO_SYNC_ENABLED") {
            config.sync.auto_sync_enabled = enabled.parse().unwrap_or(false);
        }
        if let Some(minutes) = parse_env::<u64>("PRODUCT_SYNC_SYNC_INTERVAL_MINUTES")? {
            config.sync.sync_interval_minutes = minutes;
        }
        if let Ok(path) = std::env::var("PRODUCT_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }
        if let Ok(level) = std::env::var("PRODUCT_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("api.base_url".to_string()));
        }
        if !(self.rate_limit.requests_per_second > 0.0) {
            return Err(ConfigError::InvalidValue(format!(
                "rate_limit.requests_per_second must be positive, got {}",
                self.rate_limit.requests_per_second
            )));
        }
        if self.sync.page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.page_size must be at least 1".to_string(),
            ));
        }
        if self.sync.sync_interval_minutes == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.sync_interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.sync.sync_interval_minutes > MAX_SYNC_INTERVAL_MINUTES {
            return Err(ConfigError::InvalidValue(format!(
                "sync.sync_interval_minutes must be at most {}, got {}",
                MAX_SYNC_INTERVAL_MINUTES, self.sync.sync_interval_minutes
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("Invalid value for {}: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Remote catalog API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Base URL of the remote catalog
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ApiConfig {
    /// Request timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_user_agent() -> String {
    concat!("product-sync/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Retry backoff configuration for remote API calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry in seconds
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    /// Upper bound for any single delay in seconds
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

fn default_base_delay() -> u64 {
    1
}

fn default_max_delay() -> u64 {
    60
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Token bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Tokens added per second; also the bucket capacity
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
        }
    }
}

fn default_requests_per_second() -> f64 {
    10.0
}

/// Longest accepted scheduling interval (one year)
pub const MAX_SYNC_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// Synchronization run configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Whether the daemon schedules runs automatically
    #[serde(default)]
    pub auto_sync_enabled: bool,

    /// Minutes between scheduled runs
    #[serde(default = "default_sync_interval")]
    pub sync_interval_minutes: u64,

    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Name of the pagination offset query parameter
    #[serde(default = "default_offset_param")]
    pub offset_param: String,

    /// Delay before the first scheduled run (seconds)
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Random delay added to each scheduled run (seconds)
    #[serde(default)]
    pub jitter_secs: u64,
}

impl SyncConfig {
    /// Interval between scheduled runs
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.saturating_mul(60))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_enabled: false,
            sync_interval_minutes: default_sync_interval(),
            page_size: default_page_size(),
            offset_param: default_offset_param(),
            initial_delay_secs: default_initial_delay(),
            jitter_secs: 0,
        }
    }
}

fn default_sync_interval() -> u64 {
    60
}

fn default_page_size() -> usize {
    100
}

fn default_offset_param() -> String {
    "offset".to_string()
}

fn default_initial_delay() -> u64 {
    5
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "product-sync.db".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json or pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
