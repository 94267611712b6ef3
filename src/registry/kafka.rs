//! Kafka channel registry backed by the admin API.

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;
use tracing::{debug, error, info};

use super::{validate_channel_request, ChannelRegistry};
use crate::bus::{BusError, KafkaBusConfig, Result};

/// Creates channel topics with the Kafka `AdminClient`.
///
/// Creation is optimistic: an existing topic comes back as
/// `TopicAlreadyExists`, which is treated as success.
pub struct KafkaChannelRegistry {
    admin: AdminClient<DefaultClientContext>,
    config: KafkaBusConfig,
}

impl KafkaChannelRegistry {
    pub fn new(config: KafkaBusConfig) -> Result<Self> {
        let admin: AdminClient<DefaultClientContext> = config
            .build_admin_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka admin client: {}", e)))?;

        info!(bootstrap_servers = %config.bootstrap_servers, "Kafka admin client created");

        Ok(Self { admin, config })
    }
}

#[async_trait]
impl ChannelRegistry for KafkaChannelRegistry {
    async fn ensure_channel(&self, name: &str, partitions: i32, replication: i32) -> Result<()> {
        validate_channel_request(name, partitions, replication)?;

        let topic = self.config.topic_for_channel(name);
        let new_topic = NewTopic::new(&topic, partitions, TopicReplication::Fixed(replication));
        let opts = AdminOptions::new().operation_timeout(Some(self.config.timeout));

        let results = self
            .admin
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(|e| BusError::Admin(format!("Failed to create topic {}: {}", topic, e)))?;

        for result in results {
            match result {
                Ok(created) => {
                    info!(topic = %created, partitions, replication, "Topic created");
                }
                Err((existing, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %existing, "Topic already exists");
                }
                Err((failed, code)) => {
                    error!(topic = %failed, error = %code, "Topic creation failed");
                    return Err(BusError::Admin(format!(
                        "Failed to create topic {}: {}",
                        failed, code
                    )));
                }
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // librdkafka tears the admin client down on drop; nothing to flush.
        debug!("Kafka admin client released");
        Ok(())
    }
}
