//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use serde::Deserialize;

use crate::bus::MessagingConfig;
use crate::cache::CacheConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "ALERT_FANOUT_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ALERT_FANOUT";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "ALERT_FANOUT_LOG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The alert channel this service publishes to and mirrors.
    pub channel: ChannelConfig,
    /// Broker configuration.
    pub messaging: MessagingConfig,
    /// Recent-history cache configuration.
    pub cache: CacheConfig,
    /// Connect and drain behaviour.
    pub startup: StartupConfig,
}

/// Alert channel settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Channel name.
    pub name: String,
    /// Partition count used when the channel has to be created.
    pub partitions: i32,
    /// Replication factor used when the channel has to be created.
    pub replication: i32,
    /// Consumer group the subscriber joins.
    pub consumer_group: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "alerts".to_string(),
            partitions: 1,
            replication: 1,
            consumer_group: "alert-fanout".to_string(),
        }
    }
}

/// Startup and shutdown settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Attempts per dependency while connecting (1 = no retry).
    pub connect_attempts: usize,
    /// Longest a drain waits for the in-flight alert, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            drain_timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` separated
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no backend could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.name.trim().is_empty() {
            return Err(ConfigError::Invalid("channel.name must not be empty".to_string()));
        }
        if self.channel.consumer_group.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "channel.consumer_group must not be empty".to_string(),
            ));
        }
        if self.channel.partitions < 1 || self.channel.replication < 1 {
            return Err(ConfigError::Invalid(
                "channel.partitions and channel.replication must be at least 1".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be at least 1".to_string()));
        }
        if self.startup.connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "startup.connect_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            startup: StartupConfig {
                connect_attempts: 1,
                drain_timeout_ms: 2_000,
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests;
