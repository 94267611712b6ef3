//! Kafka alert bus implementation.
//!
//! Uses one topic per channel.
//! Topic naming: `{topic_prefix}.{channel}`
//! Message key: channel name (keeps one publisher's alerts in sequence order)
//!
//! Consumers disable auto-commit and commit each offset only after every
//! handler has run, so a crash mid-alert leads to redelivery rather than loss.
//! A consumer resumes from its group's committed offset, or starts at the
//! high watermark seen while attaching.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::{debug, error, info, warn};

use super::{AlertBus, AlertConsumer, BusError, Delivery, Result};
use crate::alert::Alert;

/// Configuration for Kafka connection.
#[derive(Clone, Debug)]
pub struct KafkaBusConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Topic prefix for channels (default: "alerts").
    pub topic_prefix: String,
    /// Round-trip timeout for publish, metadata and admin calls.
    pub timeout: Duration,
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

impl KafkaBusConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            topic_prefix: "alerts".to_string(),
            timeout: Duration::from_secs(5),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set security protocol.
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SSL CA certificate location.
    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    /// Set topic prefix.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the topic name for a channel.
    pub fn topic_for_channel(&self, channel: &str) -> String {
        format!("{}.{}", self.topic_prefix, channel)
    }

    /// Build a ClientConfig for producers.
    pub(crate) fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("message.timeout.ms", self.timeout.as_millis().to_string());
        config.set("acks", "all");
        config.set("enable.idempotence", "true");

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for consumers.
    ///
    /// Start positions are assigned explicitly on attach; `auto.offset.reset`
    /// only applies if an assigned offset falls out of retention.
    pub(crate) fn build_consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", group_id);
        config.set("client.id", format!("{}-{}", group_id, uuid::Uuid::new_v4()));
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "latest");

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for the admin client.
    pub(crate) fn build_admin_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);

        self.apply_security_config(&mut config);
        config
    }

    /// Apply security settings to a ClientConfig.
    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }

        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }

        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }

        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }

        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

/// Kafka alert bus implementation.
///
/// Alerts are published to topics named `{topic_prefix}.{channel}`.
/// Each subscriber gets its own `StreamConsumer` via [`AlertBus::consumer`].
pub struct KafkaAlertBus {
    producer: FutureProducer,
    config: KafkaBusConfig,
    closed: AtomicBool,
}

impl KafkaAlertBus {
    /// Create a new Kafka alert bus.
    ///
    /// Fetches cluster metadata once so that an unreachable broker fails here
    /// instead of on the first publish.
    pub async fn new(config: KafkaBusConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        let probe = producer.clone();
        let timeout = config.timeout;
        let brokers = tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| BusError::Connection(format!("Metadata probe panicked: {}", e)))?
        .map_err(|e| BusError::Connection(format!("Kafka unreachable: {}", e)))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic_prefix = %config.topic_prefix,
            brokers,
            "Connected to Kafka"
        );

        Ok(Self {
            producer,
            config,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl AlertBus for KafkaAlertBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(channel = %alert.channel()))]
    async fn publish(&self, alert: Arc<Alert>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let topic = self.config.topic_for_channel(alert.channel());
        let payload = alert.to_json()?;
        let record = FutureRecord::to(&topic)
            .key(alert.channel())
            .payload(&payload);

        let (partition, offset) = self
            .producer
            .send(record, self.config.timeout)
            .await
            .map_err(|(e, _)| BusError::Publish(format!("Failed to publish: {}", e)))?;

        debug!(
            topic = %topic,
            sequence = alert.sequence(),
            partition,
            offset,
            "Published alert to Kafka"
        );

        Ok(())
    }

    async fn consumer(&self, group: &str, channel: &str) -> Result<Box<dyn AlertConsumer>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let consumer: StreamConsumer = self
            .config
            .build_consumer_config(group)
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        // The start position is fixed before returning, so an alert published
        // after attach is never behind the consumer.
        let topic = self.config.topic_for_channel(channel);
        let timeout = self.config.timeout;
        let (consumer, partitions) = tokio::task::spawn_blocking({
            let topic = topic.clone();
            move || {
                let assignment = resolve_assignment(&consumer, &topic, timeout)?;
                consumer.assign(&assignment).map_err(|e| {
                    BusError::Subscribe(format!("Failed to assign partitions: {}", e))
                })?;
                Ok::<_, BusError>((consumer, assignment.count()))
            }
        })
        .await
        .map_err(|e| BusError::Subscribe(format!("Partition assignment panicked: {}", e)))??;

        info!(group = %group, topic = %topic, partitions, "Attached to Kafka topic");

        Ok(Box::new(KafkaAlertConsumer {
            consumer,
            topic,
            assigned: true,
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let producer = self.producer.clone();
        let timeout = self.config.timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BusError::Connection(format!("Producer flush panicked: {}", e)))?
            .map_err(|e| BusError::Publish(format!("Failed to flush producer: {}", e)))?;

        info!("Kafka producer flushed and closed");
        Ok(())
    }
}

/// Where a partition starts: the group's committed offset if it has one,
/// otherwise the high watermark observed at attach time.
fn start_offset(committed: Offset, high_watermark: i64) -> Offset {
    match committed {
        Offset::Offset(offset) => Offset::Offset(offset),
        _ => Offset::Offset(high_watermark),
    }
}

/// Build an explicit assignment of every partition of `topic`.
///
/// Blocking; run on the blocking pool.
fn resolve_assignment(
    consumer: &StreamConsumer,
    topic: &str,
    timeout: Duration,
) -> Result<TopicPartitionList> {
    let metadata = consumer
        .fetch_metadata(Some(topic), timeout)
        .map_err(|e| BusError::Subscribe(format!("Failed to fetch topic metadata: {}", e)))?;

    let partitions: Vec<i32> = metadata
        .topics()
        .iter()
        .filter(|t| t.name() == topic && t.error().is_none())
        .flat_map(|t| t.partitions().iter().map(|p| p.id()))
        .collect();
    if partitions.is_empty() {
        return Err(BusError::UnknownChannel(topic.to_string()));
    }

    let mut requested = TopicPartitionList::new();
    for &partition in &partitions {
        requested.add_partition(topic, partition);
    }
    let committed = consumer
        .committed_offsets(requested, timeout)
        .map_err(|e| BusError::Subscribe(format!("Failed to read committed offsets: {}", e)))?;

    let mut assignment = TopicPartitionList::new();
    for partition in partitions {
        let committed = committed
            .find_partition(topic, partition)
            .map(|elem| elem.offset())
            .unwrap_or(Offset::Invalid);
        let high_watermark = match committed {
            Offset::Offset(_) => 0,
            _ => {
                consumer
                    .fetch_watermarks(topic, partition, timeout)
                    .map_err(|e| {
                        BusError::Subscribe(format!("Failed to fetch watermarks: {}", e))
                    })?
                    .1
            }
        };
        assignment
            .add_partition_offset(topic, partition, start_offset(committed, high_watermark))
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
    }
    Ok(assignment)
}

/// A consumer group member attached to one channel topic.
///
/// Partitions are assigned explicitly rather than through a group rebalance;
/// the group id scopes the committed offsets.
pub struct KafkaAlertConsumer {
    consumer: StreamConsumer,
    topic: String,
    assigned: bool,
}

#[async_trait]
impl AlertConsumer for KafkaAlertConsumer {
    async fn recv(&mut self) -> Option<Result<Delivery>> {
        if !self.assigned {
            return None;
        }

        loop {
            let message = match self.consumer.recv().await {
                Ok(message) => message,
                Err(e) => {
                    return Some(Err(BusError::Subscribe(format!(
                        "Kafka consumer error: {}",
                        e
                    ))))
                }
            };

            let decoded = match message.payload() {
                Some(payload) => Alert::from_json(payload).map_err(|e| e.to_string()),
                None => Err("message has no payload".to_string()),
            };

            match decoded {
                Ok(alert) => {
                    debug!(
                        topic = %message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        "Received alert"
                    );
                    return Some(Ok(Delivery {
                        alert: Arc::new(alert),
                        partition: message.partition(),
                        offset: message.offset(),
                    }));
                }
                Err(reason) => {
                    warn!(
                        topic = %message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %reason,
                        "Skipping undecodable message"
                    );
                    // Still commit to avoid reprocessing malformed messages
                    if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                        error!(error = %e, "Failed to commit offset");
                    }
                }
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &self.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(|e| BusError::Ack(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BusError::Ack(format!("Failed to commit offset: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        if self.assigned {
            self.assigned = false;
            self.consumer
                .unassign()
                .map_err(|e| BusError::Connection(format!("Failed to unassign partitions: {}", e)))?;
            info!(topic = %self.topic, "Kafka consumer detached");
        }
        Ok(())
    }
}
