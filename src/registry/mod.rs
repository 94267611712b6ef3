//! Channel registry: idempotent creation of named channels.
//!
//! Implementations:
//! - `ChannelAlertBus`: the in-process bus keeps its own channel map
//! - `KafkaChannelRegistry`: topics created through the Kafka admin API

use async_trait::async_trait;

use crate::bus::{BusError, Result};

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "kafka")]
pub use kafka::KafkaChannelRegistry;

/// Ensures channels exist before they are used.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    /// Create `name` with the given partition and replication factors unless
    /// it already exists.
    ///
    /// Losing a creation race to a concurrent caller is not an error.
    async fn ensure_channel(&self, name: &str, partitions: i32, replication: i32) -> Result<()>;

    /// Release the administrative connection.
    async fn close(&self) -> Result<()>;
}

/// Reject requests no backend could satisfy.
pub fn validate_channel_request(name: &str, partitions: i32, replication: i32) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BusError::InvalidArgument(
            "channel name must not be empty".to_string(),
        ));
    }
    if partitions < 1 {
        return Err(BusError::InvalidArgument(format!(
            "partitions must be at least 1, got {}",
            partitions
        )));
    }
    if replication < 1 {
        return Err(BusError::InvalidArgument(format!(
            "replication must be at least 1, got {}",
            replication
        )));
    }
    Ok(())
}
