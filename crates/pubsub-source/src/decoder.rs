//! Decoding of device event payloads into trait events.
//!
//! A payload is a JSON document of the form
//!
//! ```json
//! {
//!     "eventId": "0120ecc7-3b57-4eb4-9941-91609f189fb4",
//!     "timestamp": "2025-01-01T00:00:00.000Z",
//!     "resourceUpdate": {
//!         "name": "enterprises/.../devices/...",
//!         "traits": {
//!             "sdm.devices.traits.Temperature": { "ambientTemperatureCelsius": 21.5 }
//!         }
//!     }
//! }
//! ```
//!
//! Every entry of `resourceUpdate.traits` becomes one [`TraitEvent`].

use nest_sync_event_store::TraitEvent;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// The payload was not a usable event document.
#[derive(Debug, Error)]
#[error("Failed to decode event payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    event_id: String,
    timestamp: String,
    #[serde(default)]
    resource_update: Option<ResourceUpdate>,
}

#[derive(Debug, Deserialize)]
struct ResourceUpdate {
    #[serde(default)]
    traits: Option<Map<String, Value>>,
}

/// A decoded event envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub event_id: String,
    pub timestamp: String,
    traits: Map<String, Value>,
}

impl DecodedEvent {
    pub fn trait_count(&self) -> usize {
        self.traits.len()
    }

    /// One trait event per trait entry, in payload order.
    pub fn into_trait_events(self) -> impl Iterator<Item = TraitEvent> {
        let event_id = self.event_id;
        let timestamp = self.timestamp;
        self.traits.into_iter().map(move |(trait_name, data)| TraitEvent {
            event_id: event_id.clone(),
            trait_name,
            event_time: timestamp.clone(),
            data,
        })
    }
}

/// Decode a raw payload.
///
/// `eventId` and `timestamp` must be present strings. A missing
/// `resourceUpdate` or `traits` yields an event with no traits.
pub fn decode(payload: &[u8]) -> Result<DecodedEvent, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    let traits = envelope
        .resource_update
        .and_then(|update| update.traits)
        .unwrap_or_default();

    Ok(DecodedEvent {
        event_id: envelope.event_id,
        timestamp: envelope.timestamp,
        traits,
    })
}

/// Decode a payload straight into its trait events.
pub fn decode_trait_events(
    payload: &[u8],
) -> Result<impl Iterator<Item = TraitEvent>, DecodeError> {
    Ok(decode(payload)?.into_trait_events())
}
