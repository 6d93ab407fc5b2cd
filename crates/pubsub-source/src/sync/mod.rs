//! Continuous ingestion from a subscription into the event store.

mod ingest;

use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::processor::ProcessorConfig;

pub use ingest::{run_ingestion, IngestStats};

/// Largest ack deadline Pub/Sub accepts, which bounds the release delay.
pub const MAX_RELEASE_DELAY_SECS: u64 = 600;

/// Configuration for the ingestion loop.
#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Maximum number of messages pulled per batch
    #[clap(long, default_value_t = 100, env = "NEST_SYNC_BATCH_SIZE")]
    pub batch_size: usize,
    /// Milliseconds to wait for messages on each pull before treating the batch as empty
    #[clap(long, default_value_t = 10_000)]
    pub pull_timeout_ms: u64,
    /// Seconds allowed for each acknowledge / release call
    #[clap(long, default_value_t = 10)]
    pub disposition_timeout_secs: u64,
    /// Redelivery delay for released messages in seconds (0 = redeliver immediately, at most 600)
    #[clap(long, default_value_t = 0)]
    pub release_delay_secs: u64,
    /// Milliseconds to back off after a failed pull
    #[clap(long, default_value_t = 5_000)]
    pub error_backoff_ms: u64,
    /// Messages of one batch decoded and written concurrently
    #[clap(long, default_value_t = 1)]
    pub max_concurrent_messages: usize,
    /// Run a single pull cycle and exit (for cron / timer supervision)
    #[clap(long)]
    pub once: bool,
    /// Exit after the first pull that returns no messages
    #[clap(long)]
    pub exit_when_idle: bool,
    /// Exit after processing this many non-empty batches
    #[clap(long)]
    pub max_batches: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 100,
            pull_timeout_ms: 10_000,
            disposition_timeout_secs: 10,
            release_delay_secs: 0,
            error_backoff_ms: 5_000,
            max_concurrent_messages: 1,
            once: false,
            exit_when_idle: false,
            max_batches: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(Error::InvalidConfig(format!(
                "batch size must be between 1 and 1000, got {}",
                self.batch_size
            )));
        }
        if self.pull_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "pull timeout must not be zero".to_string(),
            ));
        }
        if self.release_delay_secs > MAX_RELEASE_DELAY_SECS {
            return Err(Error::InvalidConfig(format!(
                "release delay must be at most {MAX_RELEASE_DELAY_SECS} seconds, got {}",
                self.release_delay_secs
            )));
        }
        if self.max_concurrent_messages == 0 {
            return Err(Error::InvalidConfig(
                "max concurrent messages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_concurrent_messages: self.max_concurrent_messages,
            disposition_timeout: Duration::from_secs(self.disposition_timeout_secs),
            release_delay: Duration::from_secs(self.release_delay_secs),
        }
    }
}

/// Sets up a shutdown signal handler.
///
/// The returned receiver fires once on Ctrl+C / SIGINT.
pub fn setup_shutdown_handler() -> broadcast::Receiver<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt signal (Ctrl+C)");
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                // Keep the sender alive so the loop is not stopped by a closed channel.
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    });

    shutdown_rx
}
