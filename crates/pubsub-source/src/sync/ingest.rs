//! Pull loop driving the batch processor.
//!
//! One batch is in flight at a time. A shutdown signal stops the loop before
//! the next pull; a batch that is already being processed always finishes its
//! acknowledge / release calls first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nest_sync_event_store::EventStore;
use nest_sync_pubsub::Broker;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::Config;
use crate::error::{Error, Result};
use crate::processor::{BatchProcessor, BatchReport};

/// Counters accumulated over one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Non-empty batches processed
    pub batches: u64,
    /// Pulls that returned no messages
    pub empty_pulls: u64,
    /// Pulls that failed at the transport level
    pub pull_errors: u64,
    /// Messages the broker confirmed as acknowledged
    pub acknowledged: u64,
    /// Messages the broker confirmed as released
    pub released: u64,
    /// Batches whose acknowledge and/or release call failed
    pub disposition_errors: u64,
    /// Trait rows written, including partial writes of released messages
    pub traits_written: u64,
}

impl IngestStats {
    fn record(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.acknowledged += report.acknowledged() as u64;
        self.released += report.released() as u64;
        self.traits_written += report.traits_written() as u64;
        if report.disposition_error.is_some() {
            self.disposition_errors += 1;
        }
    }
}

/// Run the ingestion loop until shutdown, deadline, or a configured stop condition.
///
/// Stop conditions:
/// - a message on `shutdown` (or its sender being dropped)
/// - `deadline` passing
/// - `config.once` after one pull cycle
/// - `config.exit_when_idle` after an empty pull
/// - `config.max_batches` non-empty batches processed
///
/// A pending shutdown signal always wins over the next pull. Transient pull
/// failures are logged and retried after `config.error_backoff_ms`; permanent
/// ones (rejected credentials, missing subscription, closed broker) end the
/// loop with [`Error::Broker`]. Disposition failures are logged and counted.
/// The broker is closed before returning.
pub async fn run_ingestion<B, S>(
    broker: Arc<B>,
    store: Arc<S>,
    config: &Config,
    deadline: Option<DateTime<Utc>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<IngestStats>
where
    B: Broker + ?Sized,
    S: EventStore + ?Sized,
{
    config.validate()?;

    let processor = BatchProcessor::new(Arc::clone(&broker), store, config.processor_config());
    let pull_timeout = config.pull_timeout();
    let mut stats = IngestStats::default();
    let mut fatal = None;

    info!(
        "Starting ingestion: batch size {}, pull timeout {:?}",
        config.batch_size, pull_timeout
    );
    if let Some(deadline) = deadline {
        info!("Will stop at deadline: {deadline}");
    }

    loop {
        if let Some(deadline) = deadline {
            if Utc::now() >= deadline {
                info!("Deadline reached, stopping ingestion");
                break;
            }
        }
        if let Some(max) = config.max_batches {
            if stats.batches >= max {
                info!("Processed {max} batches, stopping ingestion");
                break;
            }
        }

        let pulled = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("Received shutdown signal, stopping before the next pull");
                break;
            }
            pulled = broker.pull(config.batch_size, pull_timeout) => pulled,
        };

        match pulled {
            Ok(batch) if batch.is_empty() => {
                stats.empty_pulls += 1;
                debug!("No messages received within {pull_timeout:?}");
                if config.exit_when_idle {
                    info!("Subscription is idle, stopping ingestion");
                    break;
                }
            }
            Ok(batch) => {
                let span = info_span!("batch", seq = stats.batches + 1, size = batch.len());
                let report = processor.process_batch(batch).instrument(span).await;
                if let Err(e) = report.disposition_result() {
                    error!("Batch disposition failed: {e}");
                }
                stats.record(&report);
            }
            Err(e) if e.is_permanent() => {
                stats.pull_errors += 1;
                error!("Pull failed permanently, stopping ingestion: {e}");
                fatal = Some(e);
                break;
            }
            Err(e) => {
                stats.pull_errors += 1;
                let backoff = config.error_backoff();
                error!("Error pulling messages: {e}. Retrying in {backoff:?}");
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        info!("Received shutdown signal during backoff");
                        break;
                    }
                    _ = sleep(backoff) => {}
                }
            }
        }

        if config.once {
            break;
        }
    }

    if let Err(e) = broker.close().await {
        warn!("Failed to close broker connection: {e}");
    }

    info!(
        "Ingestion finished: {} batches, {} acknowledged, {} released, {} trait rows written, {} pull errors, {} disposition errors",
        stats.batches,
        stats.acknowledged,
        stats.released,
        stats.traits_written,
        stats.pull_errors,
        stats.disposition_errors
    );

    match fatal {
        Some(e) => Err(Error::Broker(e)),
        None => Ok(stats),
    }
}
