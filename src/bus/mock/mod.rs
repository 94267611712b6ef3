//! Mock alert bus implementation for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AlertBus, AlertConsumer, BusError, Result};
use crate::alert::Alert;

/// Mock alert bus for testing.
///
/// Records every published alert; consuming is not supported.
#[derive(Default)]
pub struct MockAlertBus {
    published: RwLock<Vec<Alert>>,
    fail_on_publish: RwLock<bool>,
}

impl MockAlertBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl AlertBus for MockAlertBus {
    async fn publish(&self, alert: Arc<Alert>) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        self.published.write().await.push((*alert).clone());
        Ok(())
    }

    async fn consumer(&self, _group: &str, _channel: &str) -> Result<Box<dyn AlertConsumer>> {
        Err(BusError::SubscribeNotSupported)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
