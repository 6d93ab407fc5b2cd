use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nest_sync::event_store::{EventStore, SqliteEventStore, StorageError, TraitEvent};
use nest_sync::source::Config;
use serde_json::{json, Value};
use tempfile::TempDir;

/// A SQLite store in a temporary directory; the directory lives as long as the value.
pub struct TestStore {
    pub store: Arc<SqliteEventStore>,
    _dir: TempDir,
}

pub async fn temp_store() -> TestStore {
    let dir = TempDir::new().unwrap();
    let store = SqliteEventStore::open(dir.path().join("events.db")).unwrap();
    store.initialize().await.unwrap();
    TestStore {
        store: Arc::new(store),
        _dir: dir,
    }
}

/// Loop configuration with short timeouts.
pub fn fast_config() -> Config {
    Config {
        pull_timeout_ms: 50,
        error_backoff_ms: 10,
        disposition_timeout_secs: 1,
        ..Config::default()
    }
}

pub fn payload(event_id: &str, timestamp: &str, traits: Value) -> String {
    json!({
        "eventId": event_id,
        "timestamp": timestamp,
        "resourceUpdate": {
            "name": "enterprises/project-id/devices/device-id",
            "traits": traits,
        },
    })
    .to_string()
}

/// Store wrapper that rejects writes of one trait a limited number of times.
pub struct FlakyStore {
    pub inner: Arc<SqliteEventStore>,
    failing_trait: String,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteEventStore>, failing_trait: &str, failures: usize) -> Self {
        Self {
            inner,
            failing_trait: failing_trait.to_string(),
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn initialize(&self) -> nest_sync::event_store::Result<()> {
        self.inner.initialize().await
    }

    async fn upsert(&self, event: &TraitEvent) -> nest_sync::event_store::Result<()> {
        if event.trait_name == self.failing_trait
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            let cause = std::io::Error::other(format!("disk full writing {}", event.trait_name));
            return Err(StorageError::Serialization(serde_json::Error::io(cause)));
        }
        self.inner.upsert(event).await
    }
}
