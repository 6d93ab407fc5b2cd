use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A message leased from a subscription.
///
/// The message stays leased until it is either acknowledged or released
/// through the [`Broker`] that delivered it, using `ack_id` as the handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Lease handle, valid for this delivery only
    pub ack_id: String,
    /// Identifier assigned by the publisher side; stable across redeliveries
    pub message_id: String,
    /// Raw payload bytes (already base64-decoded)
    pub data: Vec<u8>,
    /// Publish time as reported by the broker (RFC 3339)
    pub publish_time: Option<String>,
    /// Delivery attempt counter, when the subscription tracks it
    pub delivery_attempt: Option<u32>,
    /// Message attributes
    pub attributes: HashMap<String, String>,
}

/// Pull/acknowledge/release capability of a message broker subscription.
///
/// Implemented by [`crate::PubSubSubscriber`] for a live subscription and by
/// [`crate::MemoryBroker`] for tests and local replay. Callers must give every
/// pulled message exactly one terminal disposition: acknowledge or release.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Pull up to `max_messages` messages, waiting at most `timeout`.
    ///
    /// Returns an empty vector when nothing arrives within `timeout`.
    async fn pull(&self, max_messages: usize, timeout: Duration) -> Result<Vec<ReceivedMessage>>;

    /// Acknowledge the given leases; the broker will not redeliver them.
    async fn acknowledge(&self, ack_ids: &[String]) -> Result<()>;

    /// Release the given leases so they are redelivered after `delay`.
    ///
    /// A zero delay makes them eligible for redelivery immediately.
    async fn release(&self, ack_ids: &[String], delay: Duration) -> Result<()>;

    /// Release the underlying connection. Further calls fail with [`crate::Error::Closed`].
    async fn close(&self) -> Result<()>;
}
