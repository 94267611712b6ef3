//! Connection handles acquired while connecting, released in reverse.

use std::sync::Arc;

use tracing::{error, info};

use crate::bus::AlertBus;
use crate::cache::HistoryCache;
use crate::error::{AlertError, Result};
use crate::registry::ChannelRegistry;
use crate::subscriber::Subscriber;

/// One open session owned by the service.
pub enum ConnectionHandle {
    Registry(Arc<dyn ChannelRegistry>),
    Publisher(Arc<dyn AlertBus>),
    Subscriber(Subscriber),
    Cache(Arc<dyn HistoryCache>),
}

impl ConnectionHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionHandle::Registry(_) => "registry",
            ConnectionHandle::Publisher(_) => "publisher",
            ConnectionHandle::Subscriber(_) => "subscriber",
            ConnectionHandle::Cache(_) => "cache",
        }
    }

    /// Release the session. Consumes the handle so it cannot be released twice.
    async fn release(self, channel: &str) -> Result<()> {
        let kind = self.kind();
        let outcome = match self {
            ConnectionHandle::Registry(registry) => registry.close().await.map_err(|e| e.to_string()),
            ConnectionHandle::Publisher(bus) => bus.close().await.map_err(|e| e.to_string()),
            ConnectionHandle::Subscriber(subscriber) => {
                subscriber.close().await.map_err(|e| e.to_string())
            }
            ConnectionHandle::Cache(cache) => cache.close().await.map_err(|e| e.to_string()),
        };

        match outcome {
            Ok(()) => {
                info!(channel = %channel, handle = kind, "Connection released");
                Ok(())
            }
            Err(message) => {
                error!(
                    channel = %channel,
                    operation = "release",
                    handle = kind,
                    error = %message,
                    "Failed to release connection"
                );
                Err(AlertError::Infrastructure {
                    operation: "release",
                    channel: channel.to_string(),
                    message: format!("{}: {}", kind, message),
                })
            }
        }
    }
}

/// Handles in acquisition order.
#[derive(Default)]
pub struct HandleStack {
    handles: Vec<ConnectionHandle>,
}

impl HandleStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: ConnectionHandle) {
        self.handles.push(handle);
    }

    pub fn subscriber_mut(&mut self) -> Option<&mut Subscriber> {
        self.handles.iter_mut().find_map(|handle| match handle {
            ConnectionHandle::Subscriber(subscriber) => Some(subscriber),
            _ => None,
        })
    }

    /// Release every handle, most recently acquired first.
    ///
    /// A failed release does not stop the remaining ones; the first error is
    /// returned after all were attempted.
    pub async fn release_all(&mut self, channel: &str) -> Result<()> {
        let mut first_error = None;
        while let Some(handle) = self.handles.pop() {
            if let Err(e) = handle.release(channel).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
