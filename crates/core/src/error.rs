// Error types for routing configuration and session management
//
// Validation failures, routing misses and quota rejections are *not* errors:
// they are reported as values (ValidationResult, RoutingDecision,
// SignalOutcome). The types here cover configuration that cannot be applied
// and session lookups that cannot be satisfied.

use thiserror::Error;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading or compiling a routing/trigger configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A mapping references a workflow that is not declared in `workflows`
    #[error("mapping '{key}' references unknown workflow '{workflow}'")]
    UnknownWorkflow { key: String, workflow: String },

    /// The default workflow is not declared in `workflows`
    #[error("default workflow '{0}' is not declared in workflows")]
    UnknownDefaultWorkflow(String),

    /// The same tier appears twice in the priority order
    #[error("routing tier '{0}' appears more than once in priority")]
    DuplicateTier(String),

    /// A workflow descriptor is missing a required field
    #[error("workflow '{workflow}' has an empty {field}")]
    EmptyField { workflow: String, field: &'static str },

    /// A workflow descriptor is keyed under a different name than it declares
    #[error("workflow keyed as '{key}' declares workflow_name '{declared}'")]
    NameMismatch { key: String, declared: String },

    /// A trigger rule has an empty keyword or event type
    #[error("trigger rule {0} has an empty keyword or event type")]
    EmptyTrigger(usize),

    /// Configuration could not be parsed
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Configuration file could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create an unknown workflow error
    pub fn unknown_workflow(key: impl Into<String>, workflow: impl Into<String>) -> Self {
        ConfigError::UnknownWorkflow {
            key: key.into(),
            workflow: workflow.into(),
        }
    }

    /// Create an empty field error
    pub fn empty_field(workflow: impl Into<String>, field: &'static str) -> Self {
        ConfigError::EmptyField {
            workflow: workflow.into(),
            field,
        }
    }
}

/// Errors raised by session lookups and session channels
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No live session with this id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Session id is empty
    #[error("Session id must be a non-empty string")]
    InvalidId,

    /// The session actor is no longer accepting commands
    #[error("Session {0} is closed")]
    Closed(String),
}

impl SessionError {
    /// Create a session not found error
    pub fn not_found(session_id: impl Into<String>) -> Self {
        SessionError::NotFound(session_id.into())
    }

    /// Create a session closed error
    pub fn closed(session_id: impl Into<String>) -> Self {
        SessionError::Closed(session_id.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_workflow_display() {
        let err = ConfigError::unknown_workflow("incident", "missing_workflow");
        assert_eq!(
            err.to_string(),
            "mapping 'incident' references unknown workflow 'missing_workflow'"
        );
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ConfigError = parse.into();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::not_found("s-1").to_string(),
            "Session not found: s-1"
        );
    }
}
