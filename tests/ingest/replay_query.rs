//! Offline replay of payload files and reading rows back out.

use std::io::Write;

use nest_sync::event_store::TraitEvent;
use nest_sync::query::write_events;
use nest_sync::replay::{read_payloads, replay};
use serde_json::json;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;

use crate::common::{fast_config, payload, temp_store};

#[test]
fn test_read_payloads_skips_blank_lines() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"eventId":"e1","timestamp":"t1"}}"#).unwrap();
    writeln!(file).unwrap();
    writeln!(file, "   ").unwrap();
    writeln!(file, r#"  {{"eventId":"e2","timestamp":"t2"}}  "#).unwrap();

    let payloads = read_payloads(file.path()).unwrap();

    assert_eq!(
        payloads,
        vec![
            r#"{"eventId":"e1","timestamp":"t1"}"#.to_string(),
            r#"{"eventId":"e2","timestamp":"t2"}"#.to_string(),
        ]
    );
}

#[test]
fn test_read_payloads_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_payloads(&dir.path().join("missing.jsonl")).unwrap_err();
    assert!(err.to_string().contains("Failed to read payload file"));
}

#[tokio::test]
async fn test_replay_reports_rejected_payloads() {
    let store = temp_store().await;
    let payloads = vec![
        payload(
            "e1",
            "2025-01-01T00:00:00Z",
            json!({"Temp": {"v": 1}, "Humidity": {"v": 2}}),
        ),
        "not an event".to_string(),
        r#"{"eventId":"e3","timestamp":"2025-01-01T00:00:03Z"}"#.to_string(),
    ];

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let summary = replay(payloads, store.store.clone(), &fast_config(), shutdown_rx)
        .await
        .unwrap();

    assert_eq!(summary.published, 3);
    assert_eq!(summary.rejected, vec!["msg-2".to_string()]);
    assert_eq!(summary.stats.acknowledged, 2);
    assert_eq!(summary.stats.released, 1);
    assert_eq!(summary.stats.traits_written, 2);
    assert_eq!(store.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_write_events_filters_and_orders_by_time() {
    let store = temp_store().await;
    let payloads = vec![
        payload("late", "2025-01-03T00:00:00Z", json!({"A": {"v": 3}})),
        payload("early", "2025-01-01T00:00:00Z", json!({"A": {"v": 1}})),
        payload("mid", "2025-01-02T00:00:00Z", json!({"B": {"v": 2}, "A": {"v": 2}})),
    ];
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    replay(payloads, store.store.clone(), &fast_config(), shutdown_rx)
        .await
        .unwrap();

    let mut out = Vec::new();
    let written = write_events(
        &store.store,
        Some("2025-01-02T00:00:00Z"),
        None,
        &mut out,
    )
    .await
    .unwrap();

    let rows: Vec<TraitEvent> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(written, 3);
    assert_eq!(
        rows,
        vec![
            TraitEvent::new("mid", "A", "2025-01-02T00:00:00Z", json!({"v": 2})),
            TraitEvent::new("mid", "B", "2025-01-02T00:00:00Z", json!({"v": 2})),
            TraitEvent::new("late", "A", "2025-01-03T00:00:00Z", json!({"v": 3})),
        ]
    );
}
