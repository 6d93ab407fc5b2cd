//! nest-sync library
//!
//! Ingests device events from a Google Cloud Pub/Sub subscription, splits each
//! event into its traits, and stores them idempotently in SQLite.
//!
//! # Crates
//!
//! - `nest_sync_pubsub` - broker abstraction, live subscriber, in-memory broker
//! - `nest_sync_event_store` - SQLite trait event store
//! - `nest_sync_pubsub_source` - decoder, batch processor, ingestion loop
//!
//! # CLI Usage
//!
//! ```bash
//! # Continuous ingestion
//! nest-sync run --subscription projects/my-project/subscriptions/events-sub --db-path events.db
//!
//! # Drain the subscription once and exit (cron / systemd timer)
//! nest-sync run --subscription events-sub --project my-project --exit-when-idle
//!
//! # Push recorded payloads through the same pipeline without a broker
//! nest-sync replay --file payloads.jsonl --db-path events.db
//!
//! # Read stored rows back
//! nest-sync query --db-path events.db --from 2025-01-01T00:00:00Z
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

pub mod config;
pub mod query;
pub mod replay;
pub mod run;

pub use nest_sync_event_store as event_store;
pub use nest_sync_pubsub as pubsub;
pub use nest_sync_pubsub_source as source;

use nest_sync_event_store::{EventStore, SqliteEventStore};
use nest_sync_pubsub::{emulator_endpoint, subscription_path, SubscriberConfig, DEFAULT_ENDPOINT};

#[derive(Parser, Clone, Debug)]
pub struct PubSubOpts {
    /// Subscription, either `projects/<project>/subscriptions/<name>` or a short name with --project
    #[arg(long, env = "NEST_SYNC_SUBSCRIPTION")]
    pub subscription: String,

    /// Google Cloud project id, used when --subscription is a short name
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    pub project: Option<String>,

    /// Pub/Sub REST endpoint
    #[arg(long, default_value = DEFAULT_ENDPOINT, env = "PUBSUB_ENDPOINT")]
    pub pubsub_endpoint: String,

    /// Pub/Sub emulator host (host:port); overrides --pubsub-endpoint
    #[arg(long, env = "PUBSUB_EMULATOR_HOST")]
    pub emulator_host: Option<String>,

    /// OAuth2 access token, e.g. from `gcloud auth print-access-token`
    #[arg(long, env = "PUBSUB_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
}

impl PubSubOpts {
    /// Resolve the options into a subscriber configuration.
    pub fn subscriber_config(&self) -> anyhow::Result<SubscriberConfig> {
        let subscription = subscription_path(self.project.as_deref(), &self.subscription)
            .context("Invalid subscription")?;

        let (endpoint, access_token) = match self.emulator_host.as_deref() {
            Some(host) if !host.trim().is_empty() => (emulator_endpoint(host), None),
            _ => (self.pubsub_endpoint.clone(), self.access_token.clone()),
        };

        Ok(SubscriberConfig {
            endpoint,
            subscription,
            access_token,
        })
    }
}

#[derive(Parser, Clone, Debug)]
pub struct StoreOpts {
    /// Path of the SQLite database file
    #[arg(long, default_value = "events.db", env = "NEST_SYNC_DB_PATH")]
    pub db_path: PathBuf,
}

/// Open the event store and make sure its schema exists.
pub async fn open_store(opts: &StoreOpts) -> anyhow::Result<Arc<SqliteEventStore>> {
    let store = SqliteEventStore::open(&opts.db_path)
        .with_context(|| format!("Failed to open event store at {}", opts.db_path.display()))?;
    store.initialize().await.with_context(|| {
        format!(
            "Failed to initialize event store at {}",
            opts.db_path.display()
        )
    })?;
    Ok(Arc::new(store))
}
