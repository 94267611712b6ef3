//! Recent-history cache: the last N alerts per channel.
//!
//! `append` is append-then-trim and atomic with respect to `recent`, so a
//! reader never observes more than N entries or a half-applied append.
//! Duplicates from at-least-once redelivery are stored as-is.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::alert::Alert;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryHistoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisHistoryCache;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache capacity must be at least 1, got {0}")]
    InvalidCapacity(usize),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Cache connection is closed")]
    Closed,
}

/// Bounded, insertion-ordered history per channel.
///
/// Implementations:
/// - `MemoryHistoryCache`: in-process, per-channel mutex
/// - `RedisHistoryCache`: Redis list trimmed inside a MULTI block
#[async_trait]
pub trait HistoryCache: Send + Sync {
    /// Insert at the tail, then evict from the head until at most
    /// `capacity()` entries remain.
    async fn append(&self, channel: &str, alert: &Alert) -> Result<()>;

    /// Alerts for `channel`, oldest first. Unknown channels are empty.
    async fn recent(&self, channel: &str) -> Result<Vec<Alert>>;

    /// Maximum entries kept per channel.
    fn capacity(&self) -> usize;

    /// Release the cache connection.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Cache type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    #[default]
    Memory,
    Redis,
}

/// Cache configuration (discriminated union).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "type")]
    pub cache_type: CacheType,
    /// Entries kept per channel.
    pub capacity: usize,
    /// Redis-specific configuration.
    pub redis: RedisCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Memory,
            capacity: 10,
            redis: RedisCacheConfig::default(),
        }
    }
}

/// Redis-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Redis connection URL.
    pub url: String,
    /// Prefix for all keys.
    pub key_prefix: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "alerts".to_string(),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the history cache based on configuration.
pub async fn init_history_cache(config: &CacheConfig) -> Result<Arc<dyn HistoryCache>> {
    match config.cache_type {
        CacheType::Memory => {
            let cache = MemoryHistoryCache::new(config.capacity)?;
            info!(cache_type = "memory", capacity = config.capacity, "History cache initialized");
            Ok(Arc::new(cache))
        }
        CacheType::Redis => {
            #[cfg(feature = "redis")]
            {
                let cache = RedisHistoryCache::new(
                    &config.redis.url,
                    Some(&config.redis.key_prefix),
                    config.capacity,
                )
                .await?;
                info!(cache_type = "redis", capacity = config.capacity, "History cache initialized");
                Ok(Arc::new(cache))
            }

            #[cfg(not(feature = "redis"))]
            {
                Err(CacheError::Connection(
                    "Redis support requires the 'redis' feature. Rebuild with --features redis"
                        .to_string(),
                ))
            }
        }
    }
}
