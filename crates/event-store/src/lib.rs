//! Durable storage for trait events.
//!
//! Each source message can carry several traits; every trait becomes one row
//! keyed by `(event_id, trait)`, so redelivered messages overwrite their rows
//! instead of duplicating them.

pub mod error;
pub mod model;
pub mod store;

pub use error::{Result, StorageError};
pub use model::{composite_key, TraitEvent};
pub use store::{EventStore, SqliteEventStore};
