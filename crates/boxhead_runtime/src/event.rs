//! Events
//!
//! Events are the only thing that travels over the queues between the
//! supervisor and its plugins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors raised while building an event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("Event name must not be empty")]
    EmptyName,
}

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

/// An immutable message envelope
///
/// The name selects the handler on the receiving side. Values and params are
/// opaque to the envelope; the handler validates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent")]
pub struct Event {
    name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    values: Vec<Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, Value>,
}

impl Event {
    /// Create a new event
    pub fn new(
        name: impl Into<String>,
        values: Vec<Value>,
        params: BTreeMap<String, Value>,
    ) -> Result<Self, EventError> {
        let name = name.into();
        if name.is_empty() {
            return Err(EventError::EmptyName);
        }

        Ok(Self {
            name,
            values,
            params,
        })
    }

    /// Create an event that carries no payload
    pub fn named(name: impl Into<String>) -> Result<Self, EventError> {
        Self::new(name, Vec::new(), BTreeMap::new())
    }

    /// Start building an event
    pub fn builder(name: impl Into<String>) -> EventBuilder {
        EventBuilder {
            name: name.into(),
            values: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Positional values, in the order they were attached
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// Get a positional value
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a named parameter
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Get a number parameter
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.as_f64())
    }

    /// Get a boolean parameter
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|v| v.as_bool())
    }

    /// Take the envelope apart
    pub fn into_parts(self) -> (String, Vec<Value>, BTreeMap<String, Value>) {
        (self.name, self.values, self.params)
    }
}

/// Wire shape of an event, validated on the way in
#[derive(Deserialize)]
struct RawEvent {
    name: String,
    #[serde(default)]
    values: Vec<Value>,
    #[serde(default)]
    params: BTreeMap<String, Value>,
}

impl TryFrom<RawEvent> for Event {
    type Error = EventError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        Event::new(raw.name, raw.values, raw.params)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} values, {} params)",
            self.name,
            self.values.len(),
            self.params.len()
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for events with a payload
#[derive(Debug, Clone)]
pub struct EventBuilder {
    name: String,
    values: Vec<Value>,
    params: BTreeMap<String, Value>,
}

impl EventBuilder {
    /// Append a positional value
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Set a named parameter, replacing an earlier one with the same key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Event, EventError> {
        Event::new(self.name, self.values, self.params)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let event = Event::builder("joke")
            .value("first")
            .value(2)
            .param("volume", 60)
            .param("who", "me")
            .build()
            .unwrap();

        assert_eq!(event.name(), "joke");
        assert_eq!(event.values(), &[json!("first"), json!(2)]);
        assert_eq!(event.param_f64("volume"), Some(60.0));
        assert_eq!(event.param_str("who"), Some("me"));
        assert_eq!(event.param("missing"), None);
    }

    #[test]
    fn test_empty_name_rejected() {
        assert_eq!(Event::named(""), Err(EventError::EmptyName));
        assert_eq!(
            Event::builder("").value(1).build(),
            Err(EventError::EmptyName)
        );
    }

    #[test]
    fn test_later_param_replaces_earlier() {
        let event = Event::builder("set")
            .param("level", 1)
            .param("level", 2)
            .build()
            .unwrap();

        assert_eq!(event.params().len(), 1);
        assert_eq!(event.param("level"), Some(&json!(2)));
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::named("terminate").unwrap();
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded, json!({ "name": "terminate" }));

        let decoded: Event =
            serde_json::from_value(json!({ "name": "raw", "values": ["1234"] })).unwrap();
        assert_eq!(decoded.name(), "raw");
        assert_eq!(decoded.value(0), Some(&json!("1234")));
        assert!(decoded.params().is_empty());

        let nameless = serde_json::from_value::<Event>(json!({ "name": "" }));
        assert!(nameless.is_err());
    }
}
