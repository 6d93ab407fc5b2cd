use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One trait extracted from a source message.
///
/// Several trait events share an `event_id` when the source message carried
/// several traits; a row is identified by `(event_id, trait)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitEvent {
    pub event_id: String,
    #[serde(rename = "trait")]
    pub trait_name: String,
    /// ISO-8601 timestamp from the source message envelope
    pub event_time: String,
    pub data: Value,
}

impl TraitEvent {
    pub fn new(
        event_id: impl Into<String>,
        trait_name: impl Into<String>,
        event_time: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            trait_name: trait_name.into(),
            event_time: event_time.into(),
            data,
        }
    }

    /// Primary key of the row this event is stored under.
    pub fn composite_key(&self) -> String {
        composite_key(&self.event_id, &self.trait_name)
    }
}

/// Deterministic row key for `(event_id, trait)`.
///
/// The event id is length-prefixed so that ids or trait names containing the
/// separator can never collide: `("a:b", "c")` and `("a", "b:c")` map to
/// `3:a:b:c` and `1:a:b:c` respectively.
pub fn composite_key(event_id: &str, trait_name: &str) -> String {
    format!("{}:{event_id}:{trait_name}", event_id.len())
}
