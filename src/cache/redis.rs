//! Redis history cache.
//!
//! Each channel is one Redis list, oldest alert at the head.
//! Key format: `{prefix}:recent:{channel}`
//!
//! Append runs `RPUSH` and `LTRIM key -N -1` inside one MULTI/EXEC block, so
//! an `LRANGE` from another client sees either the list before the append or
//! the trimmed list after it.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info, warn};

use super::{CacheError, HistoryCache, Result};
use crate::alert::Alert;

/// Redis implementation of HistoryCache.
pub struct RedisHistoryCache {
    conn: ConnectionManager,
    key_prefix: String,
    capacity: usize,
    closed: AtomicBool,
}

impl RedisHistoryCache {
    /// Create a new Redis history cache.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    /// * `key_prefix` - Prefix for all keys (default: "alerts")
    /// * `capacity` - Entries kept per channel, at least 1
    pub async fn new(url: &str, key_prefix: Option<&str>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity(capacity));
        }

        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, capacity, "Connected to Redis for recent history");

        Ok(Self {
            conn,
            key_prefix: key_prefix.unwrap_or("alerts").to_string(),
            capacity,
            closed: AtomicBool::new(false),
        })
    }

    /// Build the list key for a channel.
    fn recent_key(&self, channel: &str) -> String {
        format!("{}:recent:{}", self.key_prefix, channel)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryCache for RedisHistoryCache {
    async fn append(&self, channel: &str, alert: &Alert) -> Result<()> {
        self.ensure_open()?;
        let key = self.recent_key(channel);
        let entry = alert.to_json()?;
        let keep = self.capacity as isize;
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .rpush(&key, entry)
            .ignore()
            .ltrim(&key, -keep, -1)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(
            channel = %channel,
            sequence = alert.sequence(),
            "Alert cached in Redis"
        );
        Ok(())
    }

    async fn recent(&self, channel: &str) -> Result<Vec<Alert>> {
        self.ensure_open()?;
        let key = self.recent_key(channel);
        let mut conn = self.conn.clone();

        let entries: Vec<String> = conn.lrange(&key, 0, -1).await?;

        let alerts = entries
            .iter()
            .filter_map(|entry| match Alert::from_json(entry.as_bytes()) {
                Ok(alert) => Some(alert),
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Skipping undecodable cache entry");
                    None
                }
            })
            .collect();

        Ok(alerts)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn close(&self) -> Result<()> {
        // ConnectionManager reconnects on demand; refusing further use is
        // what releasing means here. The socket closes when the cache drops.
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(key_prefix = %self.key_prefix, "Redis history cache closed");
        }
        Ok(())
    }
}

