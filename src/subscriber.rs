//! Subscriber: the receive loop of one consumer-group attachment.
//!
//! The loop handles one alert at a time, so alerts from one partition reach
//! handlers in broker order. A delivery is acknowledged only after every
//! handler ran; handler failures are logged and do not stop the stream.
//!
//! Shutdown is cooperative. Cancellation is observed only while waiting for
//! the next alert, never while a handler is running.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{
    dispatch_to_handlers, AlertBus, AlertConsumer, AlertHandler, BusError, SharedHandlers,
};

/// Pause after a consumer error before asking for the next alert.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Default bound on how long a drain waits for the in-flight alert.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

enum SubscriberState {
    /// Consumer attached, loop not started.
    Attached(Box<dyn AlertConsumer>),
    Running {
        cancel: CancellationToken,
        task: JoinHandle<Box<dyn AlertConsumer>>,
    },
    /// Loop finished. `None` if it had to be aborted or panicked.
    Drained(Option<Box<dyn AlertConsumer>>),
    Closed,
}

/// A consumer group member on one channel and the handlers it feeds.
pub struct Subscriber {
    group: String,
    channel: String,
    handlers: SharedHandlers,
    drain_timeout: Duration,
    state: SubscriberState,
}

impl Subscriber {
    /// Attach to `channel` as a member of `group`, starting at the tail.
    ///
    /// Alerts are not consumed until [`Subscriber::start`].
    pub async fn attach(
        bus: &dyn AlertBus,
        group: &str,
        channel: &str,
        handlers: SharedHandlers,
    ) -> Result<Self, BusError> {
        let consumer = bus.consumer(group, channel).await?;
        Ok(Self {
            group: group.to_string(),
            channel: channel.to_string(),
            handlers,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            state: SubscriberState::Attached(consumer),
        })
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Add a handler. Takes effect from the next alert.
    pub async fn register(&self, handler: Box<dyn AlertHandler>) {
        let mut handlers = self.handlers.write().await;
        info!(
            channel = %self.channel,
            handler = %handler.name(),
            "Handler registered"
        );
        handlers.push(handler);
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SubscriberState::Running { .. })
    }

    /// Spawn the receive loop. No-op unless freshly attached.
    pub fn start(&mut self) {
        let consumer = match std::mem::replace(&mut self.state, SubscriberState::Closed) {
            SubscriberState::Attached(consumer) => consumer,
            other => {
                self.state = other;
                warn!(channel = %self.channel, "Subscriber already started");
                return;
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(
            consumer,
            self.handlers.clone(),
            cancel.clone(),
            self.channel.clone(),
        ));

        info!(group = %self.group, channel = %self.channel, "Subscriber started");
        self.state = SubscriberState::Running { cancel, task };
    }

    /// Stop requesting alerts and wait for the in-flight one to finish.
    ///
    /// Waits at most the drain timeout; after that the loop is aborted and
    /// its unacknowledged alert will be redelivered to the group.
    pub async fn drain(&mut self) {
        let state = std::mem::replace(&mut self.state, SubscriberState::Closed);
        self.state = match state {
            SubscriberState::Running { cancel, mut task } => {
                cancel.cancel();
                match tokio::time::timeout(self.drain_timeout, &mut task).await {
                    Ok(Ok(consumer)) => {
                        info!(channel = %self.channel, "Subscriber drained");
                        SubscriberState::Drained(Some(consumer))
                    }
                    Ok(Err(e)) => {
                        error!(channel = %self.channel, error = %e, "Subscriber loop failed");
                        SubscriberState::Drained(None)
                    }
                    Err(_) => {
                        task.abort();
                        warn!(
                            channel = %self.channel,
                            timeout = ?self.drain_timeout,
                            "Drain timed out, receive loop aborted"
                        );
                        SubscriberState::Drained(None)
                    }
                }
            }
            SubscriberState::Attached(consumer) => SubscriberState::Drained(Some(consumer)),
            other => other,
        };
    }

    /// Drain if needed, then release the consumer connection.
    pub async fn close(mut self) -> Result<(), BusError> {
        self.drain().await;
        match std::mem::replace(&mut self.state, SubscriberState::Closed) {
            SubscriberState::Drained(Some(mut consumer)) => consumer.close().await,
            _ => Ok(()),
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let SubscriberState::Running { cancel, .. } = &self.state {
            cancel.cancel();
        }
    }
}

async fn receive_loop(
    mut consumer: Box<dyn AlertConsumer>,
    handlers: SharedHandlers,
    cancel: CancellationToken,
    channel: String,
) -> Box<dyn AlertConsumer> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = consumer.recv() => next,
        };

        match next {
            None => {
                info!(channel = %channel, "Consumer stream ended");
                break;
            }
            Some(Err(e)) => {
                error!(channel = %channel, operation = "receive", error = %e, "Consumer error");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                }
            }
            Some(Ok(delivery)) => {
                dispatch_to_handlers(&handlers, &delivery.alert).await;

                if let Err(e) = consumer.ack(&delivery).await {
                    // Unacknowledged alerts are redelivered after a restart.
                    error!(
                        channel = %channel,
                        operation = "ack",
                        sequence = delivery.alert.sequence(),
                        error = %e,
                        "Failed to acknowledge alert"
                    );
                }
            }
        }
    }

    consumer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use crate::alert::Alert;
    use crate::bus::{ChannelAlertBus, FnHandler};
    use crate::registry::ChannelRegistry;
    use crate::test_utils::{GatedHandler, RecordingHandler};

    async fn setup() -> (Arc<ChannelAlertBus>, Subscriber) {
        let bus = Arc::new(ChannelAlertBus::new());
        bus.ensure_channel("mrt", 1, 1).await.unwrap();
        let handlers: SharedHandlers = Arc::new(RwLock::new(Vec::new()));
        let subscriber = Subscriber::attach(bus.as_ref(), "group", "mrt", handlers)
            .await
            .unwrap();
        (bus, subscriber)
    }

    async fn publish(bus: &ChannelAlertBus, seq: u64, payload: &str) {
        bus.publish(Arc::new(Alert::new("mrt", seq, payload)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_alerts_reach_handlers_in_order() {
        let (bus, mut subscriber) = setup().await;
        let recorder = RecordingHandler::new("recorder");
        let seen = recorder.alerts();
        subscriber.register(Box::new(recorder)).await;
        subscriber.start();

        for seq in 1..=3 {
            publish(&bus, seq, &format!("alert {}", seq)).await;
        }

        RecordingHandler::wait_for(&seen, 3).await;
        let sequences: Vec<u64> = seen.lock().await.iter().map(|a| a.sequence()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);

        subscriber.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_backlog_built_before_start_is_delivered_in_full() {
        let (bus, mut subscriber) = setup().await;
        let recorder = RecordingHandler::new("recorder");
        let seen = recorder.alerts();
        subscriber.register(Box::new(recorder)).await;

        // The consumer is attached but nothing reads until start.
        for seq in 1..=3000 {
            publish(&bus, seq, &format!("alert {}", seq)).await;
        }
        subscriber.start();

        RecordingHandler::wait_for(&seen, 3000).await;
        let sequences: Vec<u64> = seen.lock().await.iter().map(|a| a.sequence()).collect();
        assert_eq!(sequences, (1..=3000).collect::<Vec<u64>>());

        subscriber.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_halt_stream() {
        let (bus, mut subscriber) = setup().await;
        subscriber
            .register(Box::new(FnHandler::new("flaky", |alert: Arc<Alert>| {
                if alert.sequence() == 1 {
                    Err("bad alert")
                } else {
                    Ok(())
                }
            })))
            .await;
        let recorder = RecordingHandler::new("recorder");
        let seen = recorder.alerts();
        subscriber.register(Box::new(recorder)).await;
        subscriber.start();

        publish(&bus, 1, "first").await;
        publish(&bus, 2, "second").await;

        RecordingHandler::wait_for(&seen, 2).await;
        subscriber.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_handler() {
        let (bus, mut subscriber) = setup().await;
        let gated = GatedHandler::new();
        let gate = gated.gate();
        subscriber.register(Box::new(gated)).await;
        subscriber.start();

        publish(&bus, 1, "slow").await;
        gate.started.notified().await;

        let drain = tokio::spawn(async move {
            subscriber.drain().await;
            subscriber
        });

        // Alerts published during the drain are not processed.
        publish(&bus, 2, "late").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drain.is_finished());

        gate.release.notify_one();
        let subscriber = drain.await.unwrap();

        assert_eq!(gate.completed(), 1);
        subscriber.close().await.unwrap();
        assert_eq!(gate.completed(), 1);
    }

    #[tokio::test]
    async fn test_drain_timeout_aborts_stuck_handler() {
        let (bus, subscriber) = setup().await;
        let mut subscriber = subscriber.with_drain_timeout(Duration::from_millis(20));
        let gated = GatedHandler::new();
        let gate = gated.gate();
        subscriber.register(Box::new(gated)).await;
        subscriber.start();

        publish(&bus, 1, "stuck").await;
        gate.started.notified().await;

        subscriber.drain().await;
        assert!(!subscriber.is_running());
        assert_eq!(gate.completed(), 0);
        subscriber.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_start_releases_consumer() {
        let (_bus, subscriber) = setup().await;
        assert!(!subscriber.is_running());
        subscriber.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_exits_when_bus_closes() {
        let (bus, mut subscriber) = setup().await;
        subscriber.start();
        AlertBus::close(bus.as_ref()).await.unwrap();
        subscriber.drain().await;
        subscriber.close().await.unwrap();
    }
}
