//! Alert service: the lifecycle coordinator and the collaborator API.
//!
//! ```text
//! send_alert ──► Publisher ──► AlertBus ──► Subscriber ──┬──► HistoryCache
//!                                                        └──► observers
//! list_recent ◄──────────────────────────────────────────── HistoryCache
//! ```
//!
//! `start` connects registry, publisher, subscriber and cache in that order;
//! `shutdown` drains and releases them in reverse.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::alert::Alert;
use crate::bus::{AlertHandler, BusError, SharedHandlers};
use crate::cache::HistoryCache;
use crate::config::Config;
use crate::error::{AlertError, Result};
use crate::lifecycle::{ConnectionHandle, HandleStack, Lifecycle, LifecycleState};
use crate::publisher::{validate_payload, Publisher};
use crate::subscriber::Subscriber;

mod connector;

pub use connector::{ConfigConnector, Connector};

/// Handler that mirrors every received alert into the history cache.
struct CacheForwarder {
    cache: Arc<dyn HistoryCache>,
}

impl AlertHandler for CacheForwarder {
    fn name(&self) -> &str {
        "recent-history"
    }

    fn handle(&self, alert: Arc<Alert>) -> BoxFuture<'static, std::result::Result<(), BusError>> {
        let cache = self.cache.clone();
        Box::pin(async move {
            cache
                .append(alert.channel(), &alert)
                .await
                .map_err(|e| BusError::HandlerFailed {
                    name: "recent-history".to_string(),
                    message: e.to_string(),
                })
        })
    }
}

/// Components the API methods use while running.
struct Components {
    publisher: Arc<Publisher>,
    cache: Arc<dyn HistoryCache>,
}

/// A running alert fan-out instance for one channel.
///
/// Instances share nothing; several can run side by side in one process.
pub struct AlertService {
    config: Config,
    connector: Box<dyn Connector>,
    lifecycle: Lifecycle,
    handlers: SharedHandlers,
    components: RwLock<Option<Components>>,
    handles: Mutex<HandleStack>,
}

impl AlertService {
    pub fn new(config: Config, connector: impl Connector + 'static) -> Self {
        Self {
            config,
            connector: Box::new(connector),
            lifecycle: Lifecycle::new(),
            handlers: Arc::new(RwLock::new(Vec::new())),
            components: RwLock::new(None),
            handles: Mutex::new(HandleStack::new()),
        }
    }

    /// Build a service whose dependencies come from `config`.
    pub fn from_config(config: Config) -> Self {
        let connector = ConfigConnector::new(config.clone());
        Self::new(config, connector)
    }

    pub fn channel(&self) -> &str {
        &self.config.channel.name
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Connect every dependency and start consuming.
    ///
    /// Any failure is fatal: handles acquired so far are released in reverse
    /// order, the service ends in `Stopped`, and the error is returned.
    pub async fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        self.lifecycle.transition(LifecycleState::Connecting)?;

        match self.connect(&mut handles).await {
            Ok(components) => {
                *self.components.write().await = Some(components);
                self.lifecycle.transition(LifecycleState::Running)?;
                if let Some(subscriber) = handles.subscriber_mut() {
                    subscriber.start();
                }
                info!(channel = %self.channel(), "Alert service running");
                Ok(())
            }
            Err(e) => {
                error!(channel = %self.channel(), error = %e, "Startup failed");
                if let Err(release_err) = handles.release_all(self.channel()).await {
                    warn!(error = %release_err, "Release after failed startup was incomplete");
                }
                self.lifecycle.transition(LifecycleState::Stopped)?;
                Err(e)
            }
        }
    }

    async fn connect(&self, handles: &mut HandleStack) -> Result<Components> {
        let channel = &self.config.channel;
        let name = channel.name.as_str();

        let registry = self
            .connector
            .connect_registry()
            .await
            .map_err(|e| AlertError::from_bus("connect_registry", name, e))?;
        handles.push(ConnectionHandle::Registry(registry.clone()));
        registry
            .ensure_channel(name, channel.partitions, channel.replication)
            .await
            .map_err(|e| AlertError::from_bus("ensure_channel", name, e))?;

        let bus = self
            .connector
            .connect_bus()
            .await
            .map_err(|e| AlertError::from_bus("connect_bus", name, e))?;
        handles.push(ConnectionHandle::Publisher(bus.clone()));
        let publisher = Arc::new(Publisher::new(bus.clone()));

        let subscriber = Subscriber::attach(
            bus.as_ref(),
            &channel.consumer_group,
            name,
            self.handlers.clone(),
        )
        .await
        .map_err(|e| AlertError::from_bus("subscribe", name, e))?
        .with_drain_timeout(Duration::from_millis(self.config.startup.drain_timeout_ms));
        handles.push(ConnectionHandle::Subscriber(subscriber));

        let cache = self
            .connector
            .connect_cache()
            .await
            .map_err(|e| AlertError::from_cache("connect_cache", name, e))?;
        handles.push(ConnectionHandle::Cache(cache.clone()));

        // The cache sees each alert before any observer does.
        self.handlers.write().await.insert(
            0,
            Box::new(CacheForwarder {
                cache: cache.clone(),
            }),
        );

        Ok(Components { publisher, cache })
    }

    async fn publisher(&self) -> Result<Arc<Publisher>> {
        let state = self.state();
        if state != LifecycleState::Running {
            return Err(AlertError::NotRunning(state));
        }
        self.components
            .read()
            .await
            .as_ref()
            .map(|c| c.publisher.clone())
            .ok_or(AlertError::NotRunning(state))
    }

    /// Publish operator text on the service channel.
    ///
    /// Surrounding whitespace is trimmed; blank text is rejected with
    /// `InvalidArgument` and never reaches the broker.
    pub async fn send_alert(&self, text: &str) -> Result<u64> {
        let text = text.trim();
        validate_payload(text)?;

        let publisher = self.publisher().await?;
        publisher.publish(self.channel(), text).await
    }

    /// Payloads of the cached recent alerts, oldest first.
    pub async fn list_recent(&self) -> Result<Vec<String>> {
        let state = self.state();
        if state != LifecycleState::Running {
            return Err(AlertError::NotRunning(state));
        }
        let cache = self
            .components
            .read()
            .await
            .as_ref()
            .map(|c| c.cache.clone())
            .ok_or(AlertError::NotRunning(state))?;

        let alerts = cache.recent(self.channel()).await.map_err(|e| {
            error!(channel = %self.channel(), operation = "recent", error = %e, "Cache read failed");
            AlertError::from_cache("recent", self.channel(), e)
        })?;

        Ok(alerts.iter().map(|a| a.payload().to_string()).collect())
    }

    /// Register an observer called for every received alert.
    ///
    /// Observers run after the cache was updated, one alert at a time.
    /// Delivery is at-least-once, so observers may see duplicates.
    pub async fn on_alert_received(&self, handler: impl AlertHandler + 'static) {
        let mut handlers = self.handlers.write().await;
        info!(channel = %self.channel(), handler = %handler.name(), "Observer registered");
        handlers.push(Box::new(handler));
    }

    /// Drain and stop.
    ///
    /// Stops accepting publishes, lets the in-flight alert finish, then
    /// releases connections in reverse acquisition order. Calling it again
    /// after the service stopped is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;

        match self.state() {
            LifecycleState::Created => {
                self.lifecycle.transition(LifecycleState::Draining)?;
                self.lifecycle.transition(LifecycleState::Stopped)?;
                return Ok(());
            }
            LifecycleState::Running => {
                if !self
                    .lifecycle
                    .transition_from(LifecycleState::Running, LifecycleState::Draining)
                {
                    return Ok(());
                }
            }
            // Connecting is never observed here: start holds the handle lock.
            LifecycleState::Connecting | LifecycleState::Draining | LifecycleState::Stopped => {
                return Ok(());
            }
        }

        info!(channel = %self.channel(), "Draining alert service");

        let publisher = self
            .components
            .read()
            .await
            .as_ref()
            .map(|c| c.publisher.clone());
        if let Some(publisher) = publisher {
            publisher.close().await;
        }

        if let Some(subscriber) = handles.subscriber_mut() {
            subscriber.drain().await;
        }

        let released = handles.release_all(self.channel()).await;
        *self.components.write().await = None;

        self.lifecycle.transition(LifecycleState::Stopped)?;
        info!(channel = %self.channel(), "Alert service stopped");
        released
    }
}
