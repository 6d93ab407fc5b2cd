//! Per-message acknowledge / release decisions across whole batches.

use std::sync::Arc;

use nest_sync::pubsub::MemoryBroker;
use nest_sync::source::{run_ingestion, Config};
use serde_json::json;
use tokio::sync::broadcast;

use crate::common::{fast_config, payload, temp_store, FlakyStore};

#[tokio::test]
async fn test_undecodable_message_does_not_affect_its_batch() {
    let store = temp_store().await;
    let broker = Arc::new(MemoryBroker::new());
    let first = broker
        .publish(payload(
            "e1",
            "2025-01-01T00:00:00Z",
            json!({"sdm.devices.traits.Temperature": {"ambientTemperatureCelsius": 21.5}}),
        ))
        .await;
    let broken = broker.publish("{not json").await;
    let third = broker
        .publish(payload(
            "e3",
            "2025-01-01T00:00:02Z",
            json!({"sdm.devices.traits.Humidity": {"ambientHumidityPercent": 40}}),
        ))
        .await;

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let config = Config {
        once: true,
        ..fast_config()
    };
    let stats = run_ingestion(
        Arc::clone(&broker),
        Arc::clone(&store.store),
        &config,
        None,
        shutdown_rx,
    )
    .await
    .unwrap();

    assert_eq!(broker.acknowledge_calls().await, vec![vec![first, third]]);
    assert_eq!(broker.release_calls().await, vec![vec![broken]]);
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.acknowledged, 2);
    assert_eq!(stats.released, 1);
    assert_eq!(store.store.count().await.unwrap(), 2);
    assert!(store
        .store
        .get("e1", "sdm.devices.traits.Temperature")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_partial_write_is_released_then_completed_on_redelivery() {
    let store = temp_store().await;
    let flaky = Arc::new(FlakyStore::new(Arc::clone(&store.store), "B", 1));
    let broker = Arc::new(MemoryBroker::new());
    let id = broker
        .publish(payload(
            "e1",
            "2025-01-01T00:00:00Z",
            json!({"A": {"v": 1}, "B": {"v": 2}, "C": {"v": 3}}),
        ))
        .await;

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let config = Config {
        max_batches: Some(2),
        ..fast_config()
    };
    let stats = run_ingestion(Arc::clone(&broker), flaky, &config, None, shutdown_rx)
        .await
        .unwrap();

    // First delivery wrote A, failed on B and never reached C.
    assert_eq!(broker.release_calls().await, vec![vec![id.clone()]]);
    // The redelivery rewrote A under the same key and completed the message.
    assert_eq!(broker.acknowledge_calls().await, vec![vec![id]]);
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.released, 1);
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.traits_written, 4);
    assert_eq!(store.store.count().await.unwrap(), 3);
    assert_eq!(broker.leased_len().await, 0);
}

#[tokio::test]
async fn test_partial_write_keeps_rows_written_before_failure() {
    let store = temp_store().await;
    let flaky = Arc::new(FlakyStore::new(Arc::clone(&store.store), "B", 1));
    let broker = Arc::new(MemoryBroker::new());
    let id = broker
        .publish(payload(
            "e1",
            "2025-01-01T00:00:00Z",
            json!({"A": {"v": 1}, "B": {"v": 2}, "C": {"v": 3}}),
        ))
        .await;

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let config = Config {
        once: true,
        ..fast_config()
    };
    let stats = run_ingestion(Arc::clone(&broker), flaky, &config, None, shutdown_rx)
        .await
        .unwrap();

    assert_eq!(stats.released, 1);
    assert_eq!(stats.traits_written, 1);
    assert_eq!(broker.release_calls().await, vec![vec![id]]);
    assert!(broker.acknowledge_calls().await.is_empty());

    let a = store.store.get("e1", "A").await.unwrap().unwrap();
    assert_eq!(a.data, json!({"v": 1}));
    assert!(store.store.get("e1", "B").await.unwrap().is_none());
    assert!(store.store.get("e1", "C").await.unwrap().is_none());
}

#[tokio::test]
async fn test_redelivered_event_does_not_duplicate_rows() {
    let store = temp_store().await;
    let broker = Arc::new(MemoryBroker::new());
    let event = payload(
        "e1",
        "2025-01-01T00:00:00Z",
        json!({"Temp": {"v": 5}, "Humidity": {"v": 40}}),
    );
    broker.publish(event.clone()).await;
    broker.publish(event).await;
    broker
        .publish(payload(
            "e1",
            "2025-01-01T00:00:09Z",
            json!({"Temp": {"v": 6}}),
        ))
        .await;

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let config = Config {
        exit_when_idle: true,
        ..fast_config()
    };
    let stats = run_ingestion(
        Arc::clone(&broker),
        Arc::clone(&store.store),
        &config,
        None,
        shutdown_rx,
    )
    .await
    .unwrap();

    assert_eq!(stats.acknowledged, 3);
    assert_eq!(stats.traits_written, 5);
    assert_eq!(store.store.count().await.unwrap(), 2);

    let temp = store.store.get("e1", "Temp").await.unwrap().unwrap();
    assert_eq!(temp.data, json!({"v": 6}));
    assert_eq!(temp.event_time, "2025-01-01T00:00:09Z");
    let humidity = store.store.get("e1", "Humidity").await.unwrap().unwrap();
    assert_eq!(humidity.data, json!({"v": 40}));
}

#[tokio::test]
async fn test_failed_acknowledge_is_counted_and_loop_continues() {
    let store = temp_store().await;
    let broker = Arc::new(MemoryBroker::new());
    broker
        .publish(payload("e1", "2025-01-01T00:00:00Z", json!({"A": {}})))
        .await;
    broker.fail_next_acknowledge("connection reset").await;

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let config = Config {
        exit_when_idle: true,
        ..fast_config()
    };
    let stats = run_ingestion(
        Arc::clone(&broker),
        Arc::clone(&store.store),
        &config,
        None,
        shutdown_rx,
    )
    .await
    .unwrap();

    assert_eq!(stats.batches, 1);
    assert_eq!(stats.disposition_errors, 1);
    assert_eq!(stats.acknowledged, 0);
    assert_eq!(stats.empty_pulls, 1);
    // The write stands; the message waits for deadline-based redelivery.
    assert_eq!(store.store.count().await.unwrap(), 1);
    assert_eq!(broker.leased_len().await, 1);
}

#[tokio::test]
async fn test_failed_release_still_acknowledges() {
    let store = temp_store().await;
    let broker = Arc::new(MemoryBroker::new());
    let good = broker
        .publish(payload("e1", "2025-01-01T00:00:00Z", json!({"A": {}})))
        .await;
    broker.publish("[]").await;
    broker.fail_next_release("unavailable").await;

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let config = Config {
        once: true,
        ..fast_config()
    };
    let stats = run_ingestion(
        Arc::clone(&broker),
        Arc::clone(&store.store),
        &config,
        None,
        shutdown_rx,
    )
    .await
    .unwrap();

    assert_eq!(broker.acknowledged().await, vec![good]);
    assert!(broker.release_calls().await.is_empty());
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.released, 0);
    assert_eq!(stats.disposition_errors, 1);
}
