// Inbound event model
//
// An Event is the normalized form of one inbound occurrence (object-storage
// notification, webhook call, chat trigger, ...). Fields are private and
// there is no `&mut` API: once built, an event cannot be changed, so routing
// can hand the same value around without defensive copies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Wire field names used by listener adapters
pub mod fields {
    pub const EVENT_TYPE: &str = "eventType";
    /// Snake-case spelling accepted from chat trigger signals
    pub const EVENT_TYPE_ALIAS: &str = "event_type";
    pub const SOURCE: &str = "source";
    pub const TIMESTAMP: &str = "timestamp";
}

/// One inbound occurrence to be routed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Event {
    /// Create an event with the given type and no source, timestamp or payload
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: None,
            timestamp: None,
            payload: Map::new(),
        }
    }

    /// Set the origin system
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the ISO-8601 timestamp
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Add a source-specific payload field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replace the whole payload
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    /// Timestamp parsed as RFC 3339, if present and well-formed
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Look up a single payload field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Render the event back into the camelCase wire mapping
    ///
    /// Payload fields are flattened next to `eventType`, `source` and
    /// `timestamp`, which is the shape the engine-side workflows expect.
    pub fn to_wire(&self) -> Value {
        let mut map = Map::with_capacity(self.payload.len() + 3);
        map.insert(
            fields::EVENT_TYPE.to_string(),
            Value::String(self.event_type.clone()),
        );
        if let Some(source) = &self.source {
            map.insert(fields::SOURCE.to_string(), Value::String(source.clone()));
        }
        if let Some(timestamp) = &self.timestamp {
            map.insert(
                fields::TIMESTAMP.to_string(),
                Value::String(timestamp.clone()),
            );
        }
        for (key, value) in &self.payload {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_and_accessors() {
        let event = Event::new("document-added")
            .with_source("s3")
            .with_timestamp("2024-05-01T10:00:00Z")
            .with_field("documentUri", "s3://bucket/key.pdf");

        assert_eq!(event.event_type(), "document-added");
        assert_eq!(event.source(), Some("s3"));
        assert_eq!(
            event.field("documentUri"),
            Some(&json!("s3://bucket/key.pdf"))
        );
        assert!(event.parsed_timestamp().is_some());
    }

    #[test]
    fn test_unparseable_timestamp_is_kept_but_not_parsed() {
        let event = Event::new("incident").with_timestamp("yesterday");
        assert_eq!(event.timestamp(), Some("yesterday"));
        assert!(event.parsed_timestamp().is_none());
    }

    #[test]
    fn test_to_wire_flattens_payload() {
        let event = Event::new("incident")
            .with_source("webhook")
            .with_field("message", "disk full");

        assert_eq!(
            event.to_wire(),
            json!({
                "eventType": "incident",
                "source": "webhook",
                "message": "disk full"
            })
        );
    }

    #[test]
    fn test_serialize_matches_wire_shape() {
        let event = Event::new("incident").with_field("severity", "high");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, event.to_wire());
    }
}
