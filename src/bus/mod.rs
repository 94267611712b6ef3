//! Alert bus for durable fan-out.
//!
//! This module contains:
//! - `AlertBus` trait: publish side of a broker connection
//! - `AlertConsumer` trait: one consumer-group attachment to a channel
//! - `AlertHandler` trait: for processing delivered alerts
//! - Bus configuration types
//! - Implementations: in-process channel, Kafka, Mock

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::alert::Alert;
use crate::registry::ChannelRegistry;

// Implementation modules
pub mod channel;
pub mod dispatch;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

// Re-exports
pub use channel::ChannelAlertBus;
pub use dispatch::dispatch_to_handlers;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaAlertBus, KafkaBusConfig};
pub use mock::MockAlertBus;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Acknowledge failed: {0}")]
    Ack(String),

    #[error("Channel administration failed: {0}")]
    Admin(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Alert codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Handler '{name}' failed: {message}")]
    HandlerFailed { name: String, message: String },

    #[error("Subscribe not supported for this bus type")]
    SubscribeNotSupported,

    #[error("Bus connection is closed")]
    Closed,
}

/// Handler for processing alerts delivered to a subscriber.
///
/// Delivery is at-least-once: a handler may see the same alert twice after
/// a consumer restart and must tolerate it.
pub trait AlertHandler: Send + Sync {
    /// Name used when logging failures.
    fn name(&self) -> &str;

    /// Process one alert.
    fn handle(&self, alert: Arc<Alert>) -> BoxFuture<'static, std::result::Result<(), BusError>>;
}

/// Handler list shared between a subscriber loop and its registrars.
pub type SharedHandlers = Arc<RwLock<Vec<Box<dyn AlertHandler>>>>;

/// Adapts a synchronous closure into an `AlertHandler`.
pub struct FnHandler<F> {
    name: String,
    f: Arc<F>,
}

impl<F, E> FnHandler<F>
where
    F: Fn(Arc<Alert>) -> std::result::Result<(), E> + Send + Sync + 'static,
    E: Display,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

impl<F, E> AlertHandler for FnHandler<F>
where
    F: Fn(Arc<Alert>) -> std::result::Result<(), E> + Send + Sync + 'static,
    E: Display,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, alert: Arc<Alert>) -> BoxFuture<'static, std::result::Result<(), BusError>> {
        let result = (self.f)(alert).map_err(|e| BusError::HandlerFailed {
            name: self.name.clone(),
            message: e.to_string(),
        });
        Box::pin(async move { result })
    }
}

/// An alert handed out by a consumer, with its broker position.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub alert: Arc<Alert>,
    pub partition: i32,
    pub offset: i64,
}

/// Publish side of a broker connection.
///
/// Implementations:
/// - `ChannelAlertBus`: in-process per-consumer mpsc queues
/// - `KafkaAlertBus`: Kafka via rdkafka
/// - `MockAlertBus`: records publishes for testing
#[async_trait]
pub trait AlertBus: Send + Sync {
    /// Append one alert to its channel's log.
    ///
    /// Returns once the broker acknowledged the append. No retry is attempted.
    async fn publish(&self, alert: Arc<Alert>) -> Result<()>;

    /// Attach a consumer group member to a channel, starting at the tail.
    async fn consumer(&self, group: &str, channel: &str) -> Result<Box<dyn AlertConsumer>>;

    /// Release the broker connection. Pending appends are flushed first.
    async fn close(&self) -> Result<()>;
}

/// One consumer-group attachment to a channel.
///
/// `recv` must be safe to cancel: a cancelled receive either loses nothing or
/// loses an unacknowledged alert that the broker will redeliver.
#[async_trait]
pub trait AlertConsumer: Send {
    /// Wait for the next alert. `None` once the channel is closed.
    async fn recv(&mut self) -> Option<Result<Delivery>>;

    /// Mark a delivery as processed so it is not redelivered.
    async fn ack(&mut self, delivery: &Delivery) -> Result<()>;

    /// Leave the consumer group and release the connection.
    async fn close(&mut self) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process channels (single process only).
    #[default]
    Channel,
    /// Kafka messaging.
    Kafka,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Kafka-specific configuration.
    pub kafka: KafkaConfig,
}

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Topic prefix for channels.
    pub topic_prefix: String,
    /// Broker round-trip timeout for publish, metadata and admin calls.
    pub timeout_ms: u64,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic_prefix: "alerts".to_string(),
            timeout_ms: 5000,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the channel registry for the configured broker.
///
/// The in-process backend shares `local` with the bus so that channels
/// created here are the ones alerts are published to.
pub async fn init_channel_registry(
    config: &MessagingConfig,
    local: &Arc<ChannelAlertBus>,
) -> Result<Arc<dyn ChannelRegistry>> {
    match config.messaging_type {
        MessagingType::Channel => Ok(local.clone()),
        MessagingType::Kafka => {
            #[cfg(feature = "kafka")]
            {
                let cfg = kafka_bus_config(&config.kafka);
                let registry = crate::registry::kafka::KafkaChannelRegistry::new(cfg)?;
                info!(messaging_type = "kafka", "Channel registry initialized");
                Ok(Arc::new(registry))
            }

            #[cfg(not(feature = "kafka"))]
            {
                Err(kafka_feature_missing())
            }
        }
    }
}

/// Initialize the alert bus based on configuration.
pub async fn init_alert_bus(
    config: &MessagingConfig,
    local: &Arc<ChannelAlertBus>,
) -> Result<Arc<dyn AlertBus>> {
    match config.messaging_type {
        MessagingType::Channel => {
            info!(messaging_type = "channel", "Alert bus initialized");
            Ok(local.clone())
        }
        MessagingType::Kafka => {
            #[cfg(feature = "kafka")]
            {
                let bus = KafkaAlertBus::new(kafka_bus_config(&config.kafka)).await?;
                info!(messaging_type = "kafka", "Alert bus initialized");
                Ok(Arc::new(bus))
            }

            #[cfg(not(feature = "kafka"))]
            {
                Err(kafka_feature_missing())
            }
        }
    }
}

#[cfg(not(feature = "kafka"))]
fn kafka_feature_missing() -> BusError {
    BusError::Connection(
        "Kafka support requires the 'kafka' feature. Rebuild with --features kafka".to_string(),
    )
}

#[cfg(feature = "kafka")]
fn kafka_bus_config(kafka_cfg: &KafkaConfig) -> KafkaBusConfig {
    let mut cfg = KafkaBusConfig::new(&kafka_cfg.bootstrap_servers)
        .with_topic_prefix(&kafka_cfg.topic_prefix)
        .with_timeout(std::time::Duration::from_millis(kafka_cfg.timeout_ms));

    if let (Some(ref user), Some(ref pass), Some(ref mechanism)) = (
        &kafka_cfg.sasl_username,
        &kafka_cfg.sasl_password,
        &kafka_cfg.sasl_mechanism,
    ) {
        cfg = cfg.with_sasl(user, pass, mechanism);
    }

    if let Some(ref protocol) = kafka_cfg.security_protocol {
        cfg = cfg.with_security_protocol(protocol);
    }

    if let Some(ref ca) = kafka_cfg.ssl_ca_location {
        cfg = cfg.with_ssl_ca(ca);
    }

    cfg
}
