//! Service-level error taxonomy.
//!
//! Backend modules keep their own error types (`BusError`, `CacheError`).
//! They are converted here at the component boundary, where the channel and
//! operation are known.

use crate::bus::BusError;
use crate::cache::CacheError;
use crate::lifecycle::LifecycleState;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, AlertError>;

/// Errors surfaced by the alert service API.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// Caller-correctable input, rejected before reaching the broker.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Broker or cache unreachable or misconfigured.
    #[error("Infrastructure error during {operation} on channel '{channel}': {message}")]
    Infrastructure {
        operation: &'static str,
        channel: String,
        message: String,
    },

    /// Publish-time failure. Never retried by the service.
    #[error("Delivery to channel '{channel}' failed: {message}")]
    Delivery { channel: String, message: String },

    /// A subscriber handler failed for one alert.
    #[error("Handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },

    #[error("Service is not running (state: {0})")]
    NotRunning(LifecycleState),

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

impl AlertError {
    pub fn infrastructure(
        operation: &'static str,
        channel: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Infrastructure {
            operation,
            channel: channel.into(),
            message: err.to_string(),
        }
    }

    pub fn from_bus(operation: &'static str, channel: &str, err: BusError) -> Self {
        match err {
            BusError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            other => Self::infrastructure(operation, channel, other),
        }
    }

    pub fn from_cache(operation: &'static str, channel: &str, err: CacheError) -> Self {
        match err {
            CacheError::InvalidCapacity(n) => {
                Self::InvalidArgument(format!("cache capacity must be at least 1, got {}", n))
            }
            other => Self::infrastructure(operation, channel, other),
        }
    }

    /// True for errors the caller can fix by changing its input.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}
