//! Test utilities: handlers that record or block.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify};

use crate::alert::Alert;
use crate::bus::{AlertHandler, BusError};

/// Shared list of alerts a `RecordingHandler` has seen.
pub type Seen = Arc<Mutex<Vec<Arc<Alert>>>>;

/// Handler that records every alert it receives.
pub struct RecordingHandler {
    name: String,
    alerts: Seen,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            alerts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn alerts(&self) -> Seen {
        self.alerts.clone()
    }

    /// Wait until `count` alerts were recorded. Panics after two seconds.
    pub async fn wait_for(seen: &Seen, count: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if seen.lock().await.len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {} alerts", count);
    }
}

impl AlertHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, alert: Arc<Alert>) -> BoxFuture<'static, Result<(), BusError>> {
        let alerts = self.alerts.clone();
        Box::pin(async move {
            alerts.lock().await.push(alert);
            Ok(())
        })
    }
}

/// Signals exchanged with a `GatedHandler`.
#[derive(Default)]
pub struct Gate {
    /// Notified when a handler invocation begins.
    pub started: Notify,
    /// Notify once to let the blocked invocation finish.
    pub release: Notify,
    completed: AtomicUsize,
}

impl Gate {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Handler that blocks inside each invocation until released.
#[derive(Default)]
pub struct GatedHandler {
    gate: Arc<Gate>,
}

impl GatedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self) -> Arc<Gate> {
        self.gate.clone()
    }
}

impl AlertHandler for GatedHandler {
    fn name(&self) -> &str {
        "gated"
    }

    fn handle(&self, _alert: Arc<Alert>) -> BoxFuture<'static, Result<(), BusError>> {
        let gate = self.gate.clone();
        Box::pin(async move {
            gate.started.notify_one();
            gate.release.notified().await;
            gate.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
