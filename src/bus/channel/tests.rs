use super::*;
use std::time::Duration;

async fn bus_with(channel: &str) -> ChannelAlertBus {
    let bus = ChannelAlertBus::new();
    bus.ensure_channel(channel, 1, 1).await.unwrap();
    bus
}

#[tokio::test]
async fn test_publish_no_receivers() {
    let bus = bus_with("mrt").await;

    // Should not error even with no consumers attached
    let result = bus.publish(Arc::new(Alert::new("mrt", 1, "x"))).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_publish_unknown_channel() {
    let bus = ChannelAlertBus::new();
    let result = bus.publish(Arc::new(Alert::new("nowhere", 1, "x"))).await;
    assert!(matches!(result, Err(BusError::UnknownChannel(_))));
}

#[tokio::test]
async fn test_consumer_starts_at_tail() {
    let bus = bus_with("mrt").await;
    bus.publish(Arc::new(Alert::new("mrt", 1, "before")))
        .await
        .unwrap();

    let mut consumer = bus.consumer("group", "mrt").await.unwrap();
    bus.publish(Arc::new(Alert::new("mrt", 2, "after")))
        .await
        .unwrap();

    let delivery = consumer.recv().await.unwrap().unwrap();
    assert_eq!(delivery.alert.payload(), "after");
    assert_eq!(delivery.offset, 1);
}

#[tokio::test]
async fn test_deliveries_arrive_in_publish_order() {
    let bus = bus_with("mrt").await;
    let mut consumer = bus.consumer("group", "mrt").await.unwrap();

    for seq in 1..=5 {
        bus.publish(Arc::new(Alert::new("mrt", seq, format!("alert {}", seq))))
            .await
            .unwrap();
    }

    let mut sequences = Vec::new();
    for _ in 0..5 {
        let delivery = consumer.recv().await.unwrap().unwrap();
        consumer.ack(&delivery).await.unwrap();
        sequences.push(delivery.alert.sequence());
    }
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_every_consumer_receives_alert() {
    let bus = bus_with("mrt").await;
    let mut first = bus.consumer("a", "mrt").await.unwrap();
    let mut second = bus.consumer("b", "mrt").await.unwrap();

    bus.publish(Arc::new(Alert::new("mrt", 1, "fan out")))
        .await
        .unwrap();

    assert_eq!(first.recv().await.unwrap().unwrap().alert.sequence(), 1);
    assert_eq!(second.recv().await.unwrap().unwrap().alert.sequence(), 1);
}

#[tokio::test]
async fn test_close_ends_consumers() {
    let bus = bus_with("mrt").await;
    let mut consumer = bus.consumer("group", "mrt").await.unwrap();

    AlertBus::close(&bus).await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(1), consumer.recv())
        .await
        .unwrap();
    assert!(next.is_none());
    assert!(matches!(
        bus.publish(Arc::new(Alert::new("mrt", 1, "x"))).await,
        Err(BusError::Closed)
    ));
}

#[tokio::test]
async fn test_closed_consumer_yields_nothing() {
    let bus = bus_with("mrt").await;
    let mut consumer = bus.consumer("group", "mrt").await.unwrap();
    consumer.close().await.unwrap();
    assert!(consumer.recv().await.is_none());
}

#[tokio::test]
async fn test_ensure_channel_is_idempotent() {
    let bus = ChannelAlertBus::new();
    bus.ensure_channel("mrt", 3, 1).await.unwrap();
    bus.ensure_channel("mrt", 5, 1).await.unwrap();

    assert_eq!(bus.channel_count().await, 1);
    assert_eq!(bus.partitions("mrt").await, Some(3));
}

#[tokio::test]
async fn test_concurrent_ensure_channel_creates_one() {
    let bus = Arc::new(ChannelAlertBus::new());

    let a = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.ensure_channel("mrt", 1, 1).await })
    };
    let b = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.ensure_channel("mrt", 1, 1).await })
    };

    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());
    assert_eq!(bus.channel_count().await, 1);
    assert!(bus.has_channel("mrt").await);
}

#[tokio::test]
async fn test_ensure_channel_rejects_zero_partitions() {
    let bus = ChannelAlertBus::new();
    let result = bus.ensure_channel("mrt", 0, 1).await;
    assert!(matches!(result, Err(BusError::InvalidArgument(_))));
    assert_eq!(bus.channel_count().await, 0);
}

#[tokio::test]
async fn test_slow_consumer_loses_nothing() {
    let bus = bus_with("mrt").await;
    let mut consumer = bus.consumer("group", "mrt").await.unwrap();

    // Far more than any fixed buffer would hold before the first recv.
    for seq in 1..=5000 {
        bus.publish(Arc::new(Alert::new("mrt", seq, format!("alert {}", seq))))
            .await
            .unwrap();
    }

    for expected in 1..=5000 {
        let delivery = consumer.recv().await.unwrap().unwrap();
        assert_eq!(delivery.alert.sequence(), expected);
        assert_eq!(delivery.offset, (expected - 1) as i64);
    }
}

#[tokio::test]
async fn test_detached_consumer_is_dropped_from_log() {
    let bus = bus_with("mrt").await;
    let mut kept = bus.consumer("a", "mrt").await.unwrap();
    let mut detached = bus.consumer("b", "mrt").await.unwrap();
    detached.close().await.unwrap();

    bus.publish(Arc::new(Alert::new("mrt", 1, "still flowing")))
        .await
        .unwrap();

    assert_eq!(kept.recv().await.unwrap().unwrap().alert.sequence(), 1);
    assert!(detached.recv().await.is_none());
}
