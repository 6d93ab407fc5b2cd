//! Offline replay of recorded payloads through the ingestion pipeline.
//!
//! Payloads are published to an in-memory broker and consumed by the same
//! processor and loop as a live subscription. Released messages are not
//! redelivered; they are reported back instead.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use nest_sync_event_store::EventStore;
use nest_sync_pubsub::MemoryBroker;
use nest_sync_pubsub_source::{run_ingestion, Config, IngestStats};
use serde::Serialize;
use tokio::sync::broadcast;

/// The in-memory broker never blocks on a pull, so idling can be detected quickly.
const REPLAY_PULL_TIMEOUT_MS: u64 = 50;

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    /// Payloads published to the in-memory broker
    pub published: usize,
    pub stats: IngestStats,
    /// Message ids of payloads that were released
    pub rejected: Vec<String>,
}

/// Read payloads from a file with one JSON document per line. Blank lines are skipped.
pub fn read_payloads(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Replay `payloads` into `store` until every payload was acknowledged or released.
pub async fn replay<S>(
    payloads: Vec<String>,
    store: Arc<S>,
    config: &Config,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<ReplaySummary>
where
    S: EventStore + ?Sized,
{
    let broker = Arc::new(MemoryBroker::without_redelivery());
    let published = payloads.len();
    for payload in payloads {
        broker.publish(payload).await;
    }
    tracing::info!("Replaying {published} payload(s)");

    let config = Config {
        pull_timeout_ms: REPLAY_PULL_TIMEOUT_MS,
        exit_when_idle: true,
        once: false,
        ..config.clone()
    };
    let stats = run_ingestion(Arc::clone(&broker), store, &config, None, shutdown).await?;

    Ok(ReplaySummary {
        published,
        stats,
        rejected: broker.dead_lettered().await,
    })
}
