//! End-to-end flows through the public service API on in-process backends.
//!
//! Run with: cargo test --test service_flow

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alert_fanout::{Alert, AlertError, AlertService, Config, FnHandler, LifecycleState};

type Received = Arc<Mutex<Vec<String>>>;

async fn started(config: Config) -> (AlertService, Received) {
    let service = AlertService::from_config(config);
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    service
        .on_alert_received(FnHandler::new("collector", move |alert: Arc<Alert>| {
            sink.lock().unwrap().push(alert.payload().to_string());
            Ok::<(), String>(())
        }))
        .await;
    service.start().await.expect("service should start");
    (service, received)
}

async fn wait_for(received: &Received, count: usize) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while received.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {} alerts", count);
}

#[tokio::test]
async fn test_operator_session() {
    let (service, received) = started(Config::for_test()).await;

    assert_eq!(service.send_alert("Circle Line delayed").await.unwrap(), 1);
    assert_eq!(service.send_alert("Circle Line resumed").await.unwrap(), 2);
    wait_for(&received, 2).await;

    assert_eq!(
        service.list_recent().await.unwrap(),
        vec!["Circle Line delayed", "Circle Line resumed"]
    );

    service.shutdown().await.unwrap();
    assert_eq!(service.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_configured_capacity_bounds_history() {
    let mut config = Config::for_test();
    config.cache.capacity = 3;
    let (service, received) = started(config).await;

    for i in 1..=5 {
        service.send_alert(&format!("alert {}", i)).await.unwrap();
    }
    wait_for(&received, 5).await;

    assert_eq!(
        service.list_recent().await.unwrap(),
        vec!["alert 3", "alert 4", "alert 5"]
    );
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_blank_alert_is_rejected() {
    let (service, _received) = started(Config::for_test()).await;

    let err = service.send_alert(" \t ").await.unwrap_err();
    assert!(matches!(err, AlertError::InvalidArgument(_)));
    assert!(service.list_recent().await.unwrap().is_empty());

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_instances_are_independent() {
    let (first, first_received) = started(Config::for_test()).await;
    let (second, second_received) = started(Config::for_test()).await;

    first.send_alert("only on first").await.unwrap();
    wait_for(&first_received, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(second_received.lock().unwrap().is_empty());
    assert!(second.list_recent().await.unwrap().is_empty());

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_state_changes_are_observable() {
    let service = AlertService::from_config(Config::for_test());
    let mut states = service.subscribe_state();
    assert_eq!(*states.borrow(), LifecycleState::Created);

    service.start().await.unwrap();
    states.changed().await.unwrap();
    assert_eq!(*states.borrow_and_update(), LifecycleState::Running);

    service.shutdown().await.unwrap();
    assert_eq!(*states.borrow_and_update(), LifecycleState::Stopped);

    let err = service.send_alert("after stop").await.unwrap_err();
    assert!(matches!(err, AlertError::NotRunning(LifecycleState::Stopped)));
}

#[tokio::test]
async fn test_invalid_capacity_fails_startup() {
    let mut config = Config::for_test();
    config.cache.capacity = 0;
    let service = AlertService::from_config(config);

    let err = service.start().await.unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(service.state(), LifecycleState::Stopped);
}
