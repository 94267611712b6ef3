//! In-memory channel-based alert bus for standalone mode.
//!
//! Each alert channel keeps one unbounded tokio mpsc queue per attached
//! consumer. A slow consumer falls behind but never loses alerts. Ideal for
//! local development and testing without external dependencies. The log
//! lives only as long as the process; there is no redelivery, so `ack` is a
//! no-op.
//!
//! Every consumer receives every alert regardless of its group.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use super::{AlertBus, AlertConsumer, BusError, Delivery, Result};
use crate::alert::Alert;
use crate::registry::{validate_channel_request, ChannelRegistry};

type Entry = (i64, Arc<Alert>);

/// Offset counter and attached consumer queues, guarded together so every
/// queue receives alerts in offset order.
#[derive(Default)]
struct LogState {
    next_offset: i64,
    consumers: Vec<mpsc::UnboundedSender<Entry>>,
}

/// One in-process channel log.
struct ChannelLog {
    state: Mutex<LogState>,
    partitions: i32,
}

impl ChannelLog {
    fn new(partitions: i32) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            partitions,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append and fan out. Returns the offset and live consumer count.
    fn append(&self, alert: Arc<Alert>) -> (i64, usize) {
        let mut state = self.lock();
        let offset = state.next_offset;
        state.next_offset += 1;
        // Detached consumers have dropped their receiver
        state
            .consumers
            .retain(|consumer| consumer.send((offset, alert.clone())).is_ok());
        (offset, state.consumers.len())
    }

    /// Attach a consumer at the tail.
    fn attach(&self) -> mpsc::UnboundedReceiver<Entry> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().consumers.push(sender);
        receiver
    }
}

/// In-memory alert bus using per-consumer tokio mpsc queues.
///
/// Channels must be created through [`ChannelRegistry::ensure_channel`]
/// before alerts can be published or consumed.
#[derive(Default)]
pub struct ChannelAlertBus {
    channels: RwLock<HashMap<String, Arc<ChannelLog>>>,
    closed: AtomicBool,
}

impl ChannelAlertBus {
    /// Create a new channel alert bus.
    pub fn new() -> Self {
        info!("Channel alert bus initialized");
        Self::default()
    }

    /// Number of channels that exist.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn has_channel(&self, name: &str) -> bool {
        self.channels.read().await.contains_key(name)
    }

    /// Partition count a channel was created with.
    pub async fn partitions(&self, name: &str) -> Option<i32> {
        self.channels.read().await.get(name).map(|c| c.partitions)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn log_for(&self, channel: &str) -> Result<Arc<ChannelLog>> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        self.channels
            .read()
            .await
            .get(channel)
            .cloned()
            .ok_or_else(|| BusError::UnknownChannel(channel.to_string()))
    }
}

#[async_trait]
impl ChannelRegistry for ChannelAlertBus {
    async fn ensure_channel(&self, name: &str, partitions: i32, replication: i32) -> Result<()> {
        validate_channel_request(name, partitions, replication)?;
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let mut channels = self.channels.write().await;
        if channels.contains_key(name) {
            debug!(channel = %name, "Channel already exists");
            return Ok(());
        }

        channels.insert(name.to_string(), Arc::new(ChannelLog::new(partitions)));
        info!(
            channel = %name,
            partitions,
            replication,
            "Channel created"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // The channel map belongs to the bus; nothing separate to release.
        debug!("Channel registry released");
        Ok(())
    }
}

#[async_trait]
impl AlertBus for ChannelAlertBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(channel = %alert.channel()))]
    async fn publish(&self, alert: Arc<Alert>) -> Result<()> {
        let log = self.log_for(alert.channel()).await?;
        let sequence = alert.sequence();
        let (offset, receivers) = log.append(alert);

        debug!(
            sequence,
            offset,
            receivers,
            "Published alert to channel"
        );

        Ok(())
    }

    async fn consumer(&self, group: &str, channel: &str) -> Result<Box<dyn AlertConsumer>> {
        let log = self.log_for(channel).await?;

        info!(group = %group, channel = %channel, "Channel consumer attached");

        Ok(Box::new(ChannelAlertConsumer {
            channel: channel.to_string(),
            receiver: Some(log.attach()),
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the senders ends every attached consumer.
        for (_, log) in self.channels.write().await.drain() {
            log.lock().consumers.clear();
        }
        info!("Channel alert bus closed");
        Ok(())
    }
}

/// Receiver side of one in-process channel.
pub struct ChannelAlertConsumer {
    channel: String,
    receiver: Option<mpsc::UnboundedReceiver<Entry>>,
}

#[async_trait]
impl AlertConsumer for ChannelAlertConsumer {
    async fn recv(&mut self) -> Option<Result<Delivery>> {
        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Some((offset, alert)) => Some(Ok(Delivery {
                alert,
                partition: 0,
                offset,
            })),
            None => {
                info!(channel = %self.channel, "Channel closed, stopping consumer");
                None
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        debug!(channel = %self.channel, offset = delivery.offset, "Ack (in-process, no-op)");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.receiver.take().is_some() {
            info!(channel = %self.channel, "Channel consumer detached");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
