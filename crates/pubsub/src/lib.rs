//! Pub/Sub subscriber library for nest-sync.
//!
//! Features:
//!
//! - Broker abstraction: pull / acknowledge / release / close behind the [`Broker`] trait
//! - Live subscriber: Google Cloud Pub/Sub v1 REST API, including the local emulator
//! - In-memory broker: same lease semantics, for tests and offline replay

/// Broker capability shared by the live and in-memory implementations
pub mod broker;
pub mod error;

/// In-memory broker with recorded dispositions and failure injection
pub mod memory;

/// Live pull subscriber over the Pub/Sub REST API
pub mod subscriber;

pub use broker::{Broker, ReceivedMessage};
pub use error::{Error, Result};
pub use memory::MemoryBroker;
pub use subscriber::{
    emulator_endpoint, subscription_path, PubSubSubscriber, SubscriberConfig, DEFAULT_ENDPOINT,
};
