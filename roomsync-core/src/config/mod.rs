//! Configuration management for roomsync
//!
//! This module provides file and environment based configuration for the
//! synchronizer's tunables: timeouts, retry policy, cache sizes and logging.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main synchronizer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// History loader configuration
    pub history: HistoryConfig,

    /// Live subscription configuration
    pub live: LiveConfig,

    /// Outbound send configuration
    pub outbound: OutboundConfig,

    /// Profile enrichment configuration
    pub profiles: ProfilesConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// History loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Bounded wait for one batch fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Additional fetch attempts after the first failure
    pub fetch_retries: u32,

    /// Base delay between fetch attempts (doubles per attempt)
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

/// Live subscription configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Bounded wait for subscribe plus acknowledgement
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,

    /// Delay before the first reconnect
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,

    /// Upper bound for any reconnect delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// How long a subscription must stay up before its failure count resets
    #[serde(with = "humantime_serde")]
    pub stable_after: Duration,

    /// Re-fetch history after a reconnect to pick up inserts missed in the gap
    pub resync_on_reconnect: bool,
}

/// Outbound send configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Bounded wait for one insert
    #[serde(with = "humantime_serde")]
    pub insert_timeout: Duration,
}

/// Profile enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    /// Bounded wait for one batched lookup
    #[serde(with = "humantime_serde")]
    pub lookup_timeout: Duration,

    /// Number of resolved profiles kept in the LRU cache
    pub cache_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,

    /// Log file path (optional)
    pub log_file: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            fetch_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            stable_after: Duration::from_secs(1),
            resync_on_reconnect: true,
        }
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            insert_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(5),
            cache_capacity: 512,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
            log_file: None,
        }
    }
}

/// Upper bound for `history.fetch_retries`
pub const MAX_FETCH_RETRIES: u32 = 10;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Overwrite `slot` when `var` is set
fn apply_override<F, T>(lookup: &F, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup(var) {
        let parsed = value.trim().parse::<T>();
        *slot = parsed.map_err(|e| ConfigError::BadOverride {
            var,
            reason: e.to_string(),
            value,
        })?;
    }
    Ok(())
}

/// Same as [`apply_override`] for durations given in milliseconds
fn apply_millis<F>(lookup: &F, var: &'static str, slot: &mut Duration) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut millis = slot.as_millis() as u64;
    apply_override(lookup, var, &mut millis)?;
    *slot = Duration::from_millis(millis);
    Ok(())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: ROOMSYNC_<SECTION>_<KEY>.
    /// Durations are given in milliseconds with an `_MS` suffix.
    /// Example: ROOMSYNC_LIVE_CONNECT_TIMEOUT_MS=5000
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from defaults plus overrides supplied by `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let lookup = &lookup;

        let history = &mut config.history;
        apply_millis(lookup, "ROOMSYNC_HISTORY_FETCH_TIMEOUT_MS", &mut history.fetch_timeout)?;
        apply_override(lookup, "ROOMSYNC_HISTORY_FETCH_RETRIES", &mut history.fetch_retries)?;
        apply_millis(lookup, "ROOMSYNC_HISTORY_RETRY_BACKOFF_MS", &mut history.retry_backoff)?;

        let live = &mut config.live;
        apply_millis(lookup, "ROOMSYNC_LIVE_CONNECT_TIMEOUT_MS", &mut live.connect_timeout)?;
        apply_override(lookup, "ROOMSYNC_LIVE_MAX_ATTEMPTS", &mut live.max_attempts)?;
        apply_millis(lookup, "ROOMSYNC_LIVE_BASE_BACKOFF_MS", &mut live.base_backoff)?;
        apply_millis(lookup, "ROOMSYNC_LIVE_MAX_BACKOFF_MS", &mut live.max_backoff)?;
        apply_millis(lookup, "ROOMSYNC_LIVE_STABLE_AFTER_MS", &mut live.stable_after)?;
        apply_override(lookup, "ROOMSYNC_LIVE_RESYNC_ON_RECONNECT", &mut live.resync_on_reconnect)?;

        apply_millis(lookup, "ROOMSYNC_OUTBOUND_INSERT_TIMEOUT_MS", &mut config.outbound.insert_timeout)?;

        let profiles = &mut config.profiles;
        apply_millis(lookup, "ROOMSYNC_PROFILES_LOOKUP_TIMEOUT_MS", &mut profiles.lookup_timeout)?;
        apply_override(lookup, "ROOMSYNC_PROFILES_CACHE_CAPACITY", &mut profiles.cache_capacity)?;

        if let Some(level) = lookup("ROOMSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        apply_override(lookup, "ROOMSYNC_LOG_JSON", &mut config.logging.json_format)?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history.fetch_timeout.is_zero() {
            return Err(ConfigError::out_of_range("history.fetch_timeout", "must be greater than 0"));
        }
        if self.history.fetch_retries > MAX_FETCH_RETRIES {
            return Err(ConfigError::out_of_range(
                "history.fetch_retries",
                format!("must be at most {MAX_FETCH_RETRIES}, got {}", self.history.fetch_retries),
            ));
        }

        if self.live.max_attempts == 0 {
            return Err(ConfigError::out_of_range("live.max_attempts", "must be greater than 0"));
        }
        if self.live.connect_timeout.is_zero() {
            return Err(ConfigError::out_of_range("live.connect_timeout", "must be greater than 0"));
        }
        if self.live.max_backoff < self.live.base_backoff {
            return Err(ConfigError::out_of_range(
                "live.max_backoff",
                "must not be smaller than live.base_backoff",
            ));
        }

        if self.outbound.insert_timeout.is_zero() {
            return Err(ConfigError::out_of_range("outbound.insert_timeout", "must be greater than 0"));
        }

        if self.profiles.lookup_timeout.is_zero() {
            return Err(ConfigError::out_of_range("profiles.lookup_timeout", "must be greater than 0"));
        }
        if self.profiles.cache_capacity == 0 {
            return Err(ConfigError::out_of_range("profiles.cache_capacity", "must be greater than 0"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::out_of_range(
                "logging.level",
                format!("must be one of {}, got {:?}", LOG_LEVELS.join(", "), self.logging.level),
            ));
        }

        Ok(())
    }

    /// Render configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = self.to_toml()?;

        std::fs::write(path, contents).map_err(|source| ConfigError::Unwritable {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}
