//! The event envelope delivered by the WebSocket event source, and a small
//! typed facade over its dynamic attribute map.

use std::collections::HashMap;

use time::OffsetDateTime;

/// Parsed payload that came attached to the event, beyond its attribute map.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Tx { height: i64, code: u32, log: String },
    NewBlock { height: i64, time: OffsetDateTime },
    Other,
}

/// A single inbound message from the event source: the subscription query it
/// matched, its attribute map, and the decoded payload.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub query: String,
    pub events: HashMap<String, Vec<String>>,
    pub data: EventData,
}

impl RawEvent {
    /// The first value for `key`, if the key is present and non-empty.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.events.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.events.contains_key(key)
    }
}
