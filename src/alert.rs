//! The alert value carried through the fan-out pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single operator alert.
///
/// Created by the publisher at send time and never mutated afterwards.
/// Fields are read through accessors; consumers share alerts as `Arc<Alert>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    channel: String,
    sequence: u64,
    payload: String,
    timestamp: DateTime<Utc>,
}

impl Alert {
    /// Create an alert stamped with the current time.
    pub fn new(channel: impl Into<String>, sequence: u64, payload: impl Into<String>) -> Self {
        Self::with_timestamp(channel, sequence, payload, Utc::now())
    }

    pub fn with_timestamp(
        channel: impl Into<String>,
        sequence: u64,
        payload: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sequence,
            payload: payload.into(),
            timestamp,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Per-channel sequence number assigned by the publisher.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Encode for the wire and the cache.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
