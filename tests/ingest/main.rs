//! Ingestion pipeline tests
//!
//! Every test drives the real decoder, batch processor and ingestion loop
//! against the in-memory broker and a SQLite file in a temporary directory,
//! so no Pub/Sub emulator is needed.

mod common;
mod dispositions;
mod replay_query;
