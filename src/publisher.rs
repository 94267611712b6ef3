//! Publisher: validates alerts, numbers them, and hands them to the bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, error};

use crate::alert::Alert;
use crate::bus::AlertBus;
use crate::error::{AlertError, Result};
use crate::lifecycle::LifecycleState;

/// Reject payloads that are empty or whitespace only.
pub fn validate_payload(payload: &str) -> Result<()> {
    if payload.trim().is_empty() {
        return Err(AlertError::InvalidArgument(
            "alert text must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Assigns per-channel sequence numbers and publishes alerts.
///
/// Sequence numbers start at 1 per channel and are strictly increasing for
/// this publisher. A failed publish still consumes its number.
///
/// Numbering and the broker append happen under one per-channel lock, so the
/// channel log holds this publisher's alerts in sequence order.
///
/// Publishes hold a read guard on the open flag for their whole duration, so
/// [`Publisher::close`] waits for in-flight publishes before returning.
pub struct Publisher {
    bus: Arc<dyn AlertBus>,
    /// Last assigned sequence per channel.
    sequences: Mutex<HashMap<String, Arc<AsyncMutex<u64>>>>,
    open: RwLock<bool>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn AlertBus>) -> Self {
        Self {
            bus,
            sequences: Mutex::new(HashMap::new()),
            open: RwLock::new(true),
        }
    }

    fn sequence_for(&self, channel: &str) -> Arc<AsyncMutex<u64>> {
        let mut sequences = self
            .sequences
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sequences
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(0)))
            .clone()
    }

    /// Publish `payload` to `channel` and return its sequence number.
    ///
    /// Fails with `InvalidArgument` for blank payloads (nothing is sent) and
    /// with `Delivery` if the broker rejects or cannot be reached. No retry.
    #[tracing::instrument(name = "alert.publish", skip_all, fields(channel = %channel))]
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        validate_payload(payload)?;

        let open = self.open.read().await;
        if !*open {
            return Err(AlertError::NotRunning(LifecycleState::Draining));
        }

        let counter = self.sequence_for(channel);
        let mut last = counter.lock().await;
        *last += 1;
        let sequence = *last;
        let alert = Arc::new(Alert::new(channel, sequence, payload));

        self.bus.publish(alert).await.map_err(|e| {
            error!(
                channel = %channel,
                operation = "publish",
                sequence,
                error = %e,
                "Publish failed"
            );
            AlertError::Delivery {
                channel: channel.to_string(),
                message: e.to_string(),
            }
        })?;

        debug!(channel = %channel, sequence, "Alert published");
        Ok(sequence)
    }

    /// Stop accepting publishes. Returns once in-flight publishes finished.
    pub async fn close(&self) {
        *self.open.write().await = false;
        debug!("Publisher closed");
    }

    pub async fn is_open(&self) -> bool {
        *self.open.read().await
    }
}
