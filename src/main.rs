//! Command-line interface for nest-sync
//!
//! # Usage Examples
//!
//! ## Live ingestion
//! ```bash
//! # Run until Ctrl+C
//! nest-sync run \
//!   --subscription projects/my-project/subscriptions/events-sub \
//!   --db-path events.db
//!
//! # Against the Pub/Sub emulator, stopping after one hour
//! PUBSUB_EMULATOR_HOST=localhost:8085 nest-sync run \
//!   --subscription events-sub --project my-project --run-for 1h
//!
//! # Single pull cycle, for cron / systemd timers
//! nest-sync run --subscription events-sub --project my-project --once
//! ```
//!
//! ## Replay and query
//! ```bash
//! nest-sync replay --file payloads.jsonl --db-path events.db
//! nest-sync query --db-path events.db --from 2025-01-01T00:00:00Z --to 2025-01-02T00:00:00Z
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nest_sync::{open_store, query, replay, run, PubSubOpts, StoreOpts};
use nest_sync_pubsub_source::{setup_shutdown_handler, Config};

#[derive(Parser)]
#[command(name = "nest-sync")]
#[command(about = "Ingest device trait events from Google Cloud Pub/Sub into SQLite")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull events from a Pub/Sub subscription and store their traits
    Run {
        /// Pub/Sub connection options
        #[command(flatten)]
        pubsub: PubSubOpts,

        /// Event store options
        #[command(flatten)]
        store: StoreOpts,

        /// Ingestion loop configuration
        #[command(flatten)]
        config: Config,

        /// Stop after this long (optional)
        /// Format: duration in seconds or with units like "30m", "2h", "1d"
        #[arg(long)]
        run_for: Option<String>,
    },

    /// Feed recorded payloads (one JSON document per line) through the pipeline
    Replay {
        /// File with one event payload per line
        #[arg(long, value_name = "FILE")]
        file: PathBuf,

        /// Event store options
        #[command(flatten)]
        store: StoreOpts,

        /// Ingestion loop configuration
        #[command(flatten)]
        config: Config,
    },

    /// Create the event store schema and exit
    Init {
        /// Event store options
        #[command(flatten)]
        store: StoreOpts,
    },

    /// Print stored trait events as JSON lines, oldest first
    Query {
        /// Event store options
        #[command(flatten)]
        store: StoreOpts,

        /// Earliest event time to include (inclusive, ISO-8601)
        #[arg(long)]
        from: Option<String>,

        /// Latest event time to include (inclusive, ISO-8601)
        #[arg(long)]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run_cli().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_cli() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pubsub,
            store,
            config,
            run_for,
        } => {
            run::run(&pubsub, &store, &config, run_for.as_deref()).await?;
        }
        Commands::Replay {
            file,
            store,
            config,
        } => {
            let payloads = replay::read_payloads(&file)?;
            let store = open_store(&store).await?;
            let summary =
                replay::replay(payloads, store, &config, setup_shutdown_handler()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Init { store } => {
            let opened = open_store(&store).await?;
            tracing::info!("Event store ready at {}", opened.location());
        }
        Commands::Query { store, from, to } => {
            let store = open_store(&store).await?;
            let stdout = std::io::stdout();
            let count =
                query::write_events(&store, from.as_deref(), to.as_deref(), stdout.lock()).await?;
            tracing::info!("Printed {count} trait event(s)");
        }
    }

    Ok(())
}
