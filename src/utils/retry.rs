//! Retry utilities: backoff builders for startup connections.
//!
//! Uses `backon` for exponential backoff with jitter. Only connecting retries;
//! publish and cache operations fail straight through to the caller.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for dependency connections while the service is connecting.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Total attempts: `attempts` (1 means no retry)
/// - Jitter enabled
pub fn connection_backoff(attempts: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(attempts.saturating_sub(1))
        .with_jitter()
}
