//! Handler dispatch utilities.
//!
//! Provides the per-alert isolation used by every subscriber loop.

use std::sync::Arc;

use tracing::{debug, error};

use super::{BusError, SharedHandlers};
use crate::alert::Alert;
use crate::error::AlertError;

/// Dispatch an alert to all registered handlers.
///
/// Calls each handler in registration order, logging errors but continuing
/// to subsequent handlers. Returns the number of handlers that failed.
pub async fn dispatch_to_handlers(handlers: &SharedHandlers, alert: &Arc<Alert>) -> usize {
    let handlers_guard = handlers.read().await;
    let mut failures = 0;

    for handler in handlers_guard.iter() {
        if let Err(e) = handler.handle(Arc::clone(alert)).await {
            let message = match e {
                BusError::HandlerFailed { message, .. } => message,
                other => other.to_string(),
            };
            let e = AlertError::Handler {
                handler: handler.name().to_string(),
                message,
            };
            error!(
                channel = %alert.channel(),
                sequence = alert.sequence(),
                handler = %handler.name(),
                error = %e,
                "Handler failed"
            );
            failures += 1;
        }
    }

    debug!(
        channel = %alert.channel(),
        sequence = alert.sequence(),
        handlers = handlers_guard.len(),
        failures,
        "Alert dispatched"
    );

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{AlertHandler, BusError, FnHandler};
    use crate::test_utils::RecordingHandler;
    use tokio::sync::RwLock;

    #[tokio::test]
    async fn test_failing_handler_does_not_block_later_handlers() {
        let recorder = RecordingHandler::new("after");
        let seen = recorder.alerts();

        let handlers: SharedHandlers = Arc::new(RwLock::new(vec![
            Box::new(FnHandler::new("broken", |_alert: Arc<Alert>| {
                Err::<(), _>("boom")
            })) as Box<dyn AlertHandler>,
            Box::new(recorder),
        ]));

        let alert = Arc::new(Alert::new("mrt", 1, "Circle Line delay"));
        let failures = dispatch_to_handlers(&handlers, &alert).await;

        assert_eq!(failures, 1);
        assert_eq!(seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_handlers_is_not_a_failure() {
        let handlers: SharedHandlers = Arc::new(RwLock::new(Vec::new()));
        let alert = Arc::new(Alert::new("mrt", 1, "x"));
        assert_eq!(dispatch_to_handlers(&handlers, &alert).await, 0);
    }

    #[tokio::test]
    async fn test_fn_handler_error_names_handler() {
        let handler = FnHandler::new("printer", |_alert: Arc<Alert>| Err::<(), _>("closed"));
        let err = handler
            .handle(Arc::new(Alert::new("mrt", 1, "x")))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::HandlerFailed { ref name, .. } if name == "printer"));
    }
}
