// Event validation and normalization
//
// Validation never fails hard: every violated rule is collected into the
// result and the caller decides whether to drop, dead-letter or log the
// event. Unknown fields are carried into the payload untouched.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::event::{fields, Event};

/// Outcome of validating one raw event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    /// Present only when `is_valid` is true
    pub normalized_event: Option<Event>,
}

impl ValidationResult {
    fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
            normalized_event: None,
        }
    }

    fn valid(event: Event) -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            normalized_event: Some(event),
        }
    }
}

/// Validates the structural shape of inbound events
#[derive(Debug, Clone, Copy, Default)]
pub struct EventValidator;

impl EventValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a raw event and, if it is well-formed, normalize it
    ///
    /// Rules are applied in order and accumulate; only the "must be a
    /// mapping" rule short-circuits. Normalization trims and lower-cases
    /// `eventType` and `source` so routing is case-insensitive.
    pub fn validate(&self, raw_event: &Value) -> ValidationResult {
        let Some(object) = raw_event.as_object() else {
            return ValidationResult::invalid(vec!["event must be a mapping".to_string()]);
        };

        let mut errors = Vec::new();

        let (type_key, event_type) = match object.get(fields::EVENT_TYPE) {
            Some(value) => (fields::EVENT_TYPE, Some(value)),
            None => (
                fields::EVENT_TYPE_ALIAS,
                object.get(fields::EVENT_TYPE_ALIAS),
            ),
        };

        let event_type = match event_type {
            None => {
                errors.push("event must contain 'eventType' field".to_string());
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                errors.push("'eventType' must be a non-empty string".to_string());
                None
            }
            Some(Value::String(s)) => Some(s.trim().to_lowercase()),
            Some(_) => {
                errors.push("eventType must be a string".to_string());
                None
            }
        };

        let source = match optional_string(object, fields::SOURCE) {
            Ok(source) => source
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
            Err(()) => {
                errors.push("'source' field must be a string if present".to_string());
                None
            }
        };

        let timestamp = match optional_string(object, fields::TIMESTAMP) {
            Ok(timestamp) => timestamp.map(str::to_string),
            Err(()) => {
                errors.push("'timestamp' field must be a string if present".to_string());
                None
            }
        };

        let event_type = match event_type {
            Some(event_type) if errors.is_empty() => event_type,
            _ => return ValidationResult::invalid(errors),
        };

        let payload: Map<String, Value> = object
            .iter()
            .filter(|(key, _)| {
                let key = key.as_str();
                key != type_key && key != fields::SOURCE && key != fields::TIMESTAMP
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut event = Event::new(event_type).with_payload(payload);
        if let Some(source) = source {
            event = event.with_source(source);
        }
        if let Some(timestamp) = timestamp {
            event = event.with_timestamp(timestamp);
        }

        ValidationResult::valid(event)
    }
}

/// `Ok(None)` when absent or null, `Err` when present with a non-string value
fn optional_string<'a>(object: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, ()> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(raw: Value) -> ValidationResult {
        EventValidator::new().validate(&raw)
    }

    #[test]
    fn test_non_mapping_short_circuits() {
        for raw in [json!("incident"), json!(42), json!(["incident"]), Value::Null] {
            let result = validate(raw);
            assert!(!result.is_valid);
            assert_eq!(result.errors, vec!["event must be a mapping".to_string()]);
            assert!(result.normalized_event.is_none());
        }
    }

    #[test]
    fn test_missing_event_type() {
        let result = validate(json!({"source": "s3"}));
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec!["event must contain 'eventType' field".to_string()]
        );
    }

    #[test]
    fn test_blank_event_type() {
        let result = validate(json!({"eventType": "   "}));
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec!["'eventType' must be a non-empty string".to_string()]
        );
    }

    #[test]
    fn test_errors_accumulate() {
        let result = validate(json!({"eventType": 7, "source": 3, "timestamp": false}));
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec![
                "eventType must be a string".to_string(),
                "'source' field must be a string if present".to_string(),
                "'timestamp' field must be a string if present".to_string(),
            ]
        );
    }

    #[test]
    fn test_normalizes_case_and_whitespace() {
        let result = validate(json!({"eventType": "  Document-Added ", "source": "S3"}));
        let event = result.normalized_event.unwrap();
        assert_eq!(event.event_type(), "document-added");
        assert_eq!(event.source(), Some("s3"));
    }

    #[test]
    fn test_empty_source_normalizes_to_none() {
        let result = validate(json!({"eventType": "incident", "source": "  "}));
        assert!(result.is_valid);
        assert_eq!(result.normalized_event.unwrap().source(), None);
    }

    #[test]
    fn test_null_source_is_absent() {
        let result = validate(json!({"eventType": "incident", "source": null}));
        assert!(result.is_valid);
    }

    #[test]
    fn test_extra_fields_preserved_in_payload() {
        let result = validate(json!({
            "eventType": "document-added",
            "source": "s3",
            "timestamp": "2024-05-01T10:00:00Z",
            "documentUri": "s3://bucket/report.pdf",
            "bucket": "bucket"
        }));

        let event = result.normalized_event.unwrap();
        assert_eq!(event.timestamp(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(event.payload().len(), 2);
        assert_eq!(
            event.field("documentUri"),
            Some(&json!("s3://bucket/report.pdf"))
        );
        assert!(event.field("eventType").is_none());
    }

    #[test]
    fn test_snake_case_alias() {
        let result = validate(json!({"event_type": "Incident"}));
        assert!(result.is_valid);
        let event = result.normalized_event.unwrap();
        assert_eq!(event.event_type(), "incident");
        assert!(event.field("event_type").is_none());
    }

    #[test]
    fn test_camel_case_wins_over_alias() {
        let result = validate(json!({"eventType": "incident", "event_type": "other"}));
        let event = result.normalized_event.unwrap();
        assert_eq!(event.event_type(), "incident");
        assert_eq!(event.field("event_type"), Some(&json!("other")));
    }
}
