//! Live ingestion from a Pub/Sub subscription.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use nest_sync_pubsub::PubSubSubscriber;
use nest_sync_pubsub_source::{run_ingestion, setup_shutdown_handler, Config, IngestStats};

use crate::config::parse_duration;
use crate::{open_store, PubSubOpts, StoreOpts};

/// Run ingestion until Ctrl+C, the optional `run_for` deadline, or a stop condition in `config`.
pub async fn run(
    pubsub: &PubSubOpts,
    store: &StoreOpts,
    config: &Config,
    run_for: Option<&str>,
) -> anyhow::Result<IngestStats> {
    let deadline = run_for.map(deadline_after).transpose()?;

    let store = open_store(store).await?;
    tracing::info!("Storing trait events in {}", store.location());

    let subscriber = PubSubSubscriber::new(pubsub.subscriber_config()?)
        .context("Failed to create Pub/Sub subscriber")?;
    let subscription = &subscriber.config().subscription;
    subscriber
        .check_subscription(config.pull_timeout())
        .await
        .with_context(|| {
            format!(
                "Cannot reach subscription {subscription} at {}",
                subscriber.config().endpoint
            )
        })?;
    tracing::info!("Subscribing to {subscription}");

    let shutdown = setup_shutdown_handler();
    let stats = run_ingestion(Arc::new(subscriber), store, config, deadline, shutdown).await?;
    Ok(stats)
}

/// Deadline `run_for` from now, e.g. "30m" or "1d".
pub fn deadline_after(run_for: &str) -> anyhow::Result<DateTime<Utc>> {
    let duration = parse_duration(run_for)
        .with_context(|| format!("Invalid --run-for duration: {run_for}"))?;
    let duration = chrono::Duration::from_std(duration)
        .with_context(|| format!("--run-for duration out of range: {run_for}"))?;
    Utc::now()
        .checked_add_signed(duration)
        .with_context(|| format!("--run-for duration out of range: {run_for}"))
}
