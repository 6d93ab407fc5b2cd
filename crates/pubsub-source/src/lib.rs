//! Pub/Sub to SQLite ingestion of device trait events.
//!
//! This crate provides:
//! - Payload decoding into per-trait events
//! - Batch processing with per-message acknowledge / release
//! - The ingestion loop used by the `nest-sync` binary
//!
//! # Delivery
//!
//! Messages are delivered at least once. Trait rows are upserted under
//! `(event_id, trait)`, so a redelivered message rewrites its rows instead of
//! duplicating them. A message is acknowledged only when every one of its
//! trait rows was written; otherwise it is released for redelivery.

pub mod decoder;
pub mod error;

/// Batch processing: decode, persist, classify, acknowledge / release
pub mod processor;

/// Ingestion loop and its configuration
pub mod sync;

pub use decoder::{decode, decode_trait_events, DecodeError, DecodedEvent};
pub use error::{Disposition, DispositionError, Error, FailedDisposition, Result};
pub use processor::{
    BatchProcessor, BatchReport, MessageOutcome, ProcessedMessage, ProcessorConfig,
};
pub use sync::{run_ingestion, setup_shutdown_handler, Config, IngestStats};
