//! In-process history cache.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{CacheError, HistoryCache, Result};
use crate::alert::Alert;

/// Per-channel ring of recent alerts.
///
/// Each channel has its own mutex, so appends to one channel serialize
/// without blocking other channels. The outer map lock is held only long
/// enough to find or create the channel entry.
pub struct MemoryHistoryCache {
    capacity: usize,
    channels: RwLock<HashMap<String, Arc<Mutex<VecDeque<Alert>>>>>,
    closed: AtomicBool,
}

impl MemoryHistoryCache {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            channels: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    async fn entries(&self, channel: &str) -> Arc<Mutex<VecDeque<Alert>>> {
        if let Some(entries) = self.channels.read().await.get(channel) {
            return entries.clone();
        }
        self.channels
            .write()
            .await
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.capacity + 1))))
            .clone()
    }
}

#[async_trait]
impl HistoryCache for MemoryHistoryCache {
    async fn append(&self, channel: &str, alert: &Alert) -> Result<()> {
        self.ensure_open()?;
        let entries = self.entries(channel).await;

        let mut entries = entries.lock().await;
        entries.push_back(alert.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }

        debug!(
            channel = %channel,
            sequence = alert.sequence(),
            len = entries.len(),
            "Alert cached"
        );
        Ok(())
    }

    async fn recent(&self, channel: &str) -> Result<Vec<Alert>> {
        self.ensure_open()?;
        let entries = match self.channels.read().await.get(channel) {
            Some(entries) => entries.clone(),
            None => return Ok(Vec::new()),
        };

        let entries = entries.lock().await;
        Ok(entries.iter().cloned().collect())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        debug!("Memory history cache closed");
        Ok(())
    }
}
