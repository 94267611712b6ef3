//! Dependency connectors used while the service is connecting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use tracing::warn;

use crate::bus::{self, init_alert_bus, init_channel_registry, AlertBus, BusError, ChannelAlertBus};
use crate::cache::{self, init_history_cache, CacheError, HistoryCache};
use crate::config::Config;
use crate::registry::ChannelRegistry;
use crate::utils::retry::connection_backoff;

/// Opens the sessions the service depends on.
///
/// Called in order: registry, bus, cache. Each call returns a fresh handle
/// owned by the caller.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_registry(&self) -> bus::Result<Arc<dyn ChannelRegistry>>;

    async fn connect_bus(&self) -> bus::Result<Arc<dyn AlertBus>>;

    async fn connect_cache(&self) -> cache::Result<Arc<dyn HistoryCache>>;
}

/// Connector driven by [`Config`], retrying each dependency with backoff.
pub struct ConfigConnector {
    config: Config,
    /// In-process broker shared by registry and bus when messaging is `channel`.
    local: Arc<ChannelAlertBus>,
}

impl ConfigConnector {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            local: Arc::new(ChannelAlertBus::new()),
        }
    }

    fn attempts(&self) -> usize {
        self.config.startup.connect_attempts
    }
}

#[async_trait]
impl Connector for ConfigConnector {
    async fn connect_registry(&self) -> bus::Result<Arc<dyn ChannelRegistry>> {
        (|| init_channel_registry(&self.config.messaging, &self.local))
            .retry(connection_backoff(self.attempts()))
            .when(|e: &BusError| !matches!(e, BusError::InvalidArgument(_)))
            .notify(|err: &BusError, dur: Duration| {
                warn!(dependency = "registry", error = %err, delay = ?dur, "Connection failed, retrying");
            })
            .await
    }

    async fn connect_bus(&self) -> bus::Result<Arc<dyn AlertBus>> {
        (|| init_alert_bus(&self.config.messaging, &self.local))
            .retry(connection_backoff(self.attempts()))
            .when(|e: &BusError| !matches!(e, BusError::InvalidArgument(_)))
            .notify(|err: &BusError, dur: Duration| {
                warn!(dependency = "bus", error = %err, delay = ?dur, "Connection failed, retrying");
            })
            .await
    }

    async fn connect_cache(&self) -> cache::Result<Arc<dyn HistoryCache>> {
        (|| init_history_cache(&self.config.cache))
            .retry(connection_backoff(self.attempts()))
            .when(|e: &CacheError| !matches!(e, CacheError::InvalidCapacity(_)))
            .notify(|err: &CacheError, dur: Duration| {
                warn!(dependency = "cache", error = %err, delay = ?dur, "Connection failed, retrying");
            })
            .await
    }
}
