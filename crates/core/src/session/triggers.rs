// Content-triggered routing
//
// A trigger table maps keywords found in user messages to event types. The
// resulting event is routed with the same Router as inbound events, so the
// workflow a keyword starts is decided by the routing configuration.
//
// {
//   "keyword_mappings": { "outage": "incident", "upload": "document-added" }
// }

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::routing::OrderedMappings;

/// Trigger configuration as loaded from JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TriggerConfig {
    /// keyword -> event_type, in registration order
    #[serde(default)]
    pub keyword_mappings: OrderedMappings,
}

impl TriggerConfig {
    /// Keywords recognized when no trigger configuration is supplied
    pub fn default_triggers() -> Self {
        Self {
            keyword_mappings: [
                ("outage", "incident"),
                ("incident", "incident"),
                ("document", "document-added"),
                ("upload", "document-added"),
                ("pdf", "document-added"),
                ("pipeline", "data-processing"),
                ("etl", "data-processing"),
                ("batch job", "data-processing"),
                ("search", "semantic-search"),
                ("find", "semantic-search"),
            ]
            .into_iter()
            .collect(),
        }
    }

    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (index, (keyword, event_type)) in self.keyword_mappings.iter().enumerate() {
            if keyword.trim().is_empty() || event_type.trim().is_empty() {
                return Err(ConfigError::EmptyTrigger(index));
            }
        }
        Ok(())
    }
}

/// One compiled keyword rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRule {
    pub keyword: String,
    pub event_type: String,
}

/// Keyword hit in a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    pub keyword: String,
    pub event_type: String,
}

/// Compiled, immutable trigger table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerTable {
    rules: Vec<TriggerRule>,
}

impl TriggerTable {
    pub fn from_config(config: &TriggerConfig) -> ConfigResult<Self> {
        config.validate()?;

        let mut rules: Vec<TriggerRule> = Vec::with_capacity(config.keyword_mappings.len());
        for (keyword, event_type) in config.keyword_mappings.iter() {
            let keyword = keyword.trim().to_lowercase();
            if rules.iter().any(|rule| rule.keyword == keyword) {
                warn!(keyword = %keyword, "Duplicate trigger keyword, first registered wins");
                continue;
            }
            rules.push(TriggerRule {
                keyword,
                event_type: event_type.trim().to_lowercase(),
            });
        }

        Ok(Self { rules })
    }

    /// Table compiled from [`TriggerConfig::default_triggers`]
    pub fn default_table() -> Self {
        let config = TriggerConfig::default_triggers();
        Self {
            rules: config
                .keyword_mappings
                .iter()
                .map(|(keyword, event_type)| TriggerRule {
                    keyword: keyword.to_string(),
                    event_type: event_type.to_string(),
                })
                .collect(),
        }
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule, in registration order, whose keyword occurs in `content`
    ///
    /// Matching is case-insensitive substring matching.
    pub fn detect(&self, content: &str) -> Option<TriggerMatch> {
        let content = content.to_lowercase();
        self.rules
            .iter()
            .find(|rule| content.contains(&rule.keyword))
            .map(|rule| TriggerMatch {
                keyword: rule.keyword.clone(),
                event_type: rule.event_type.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_case_insensitive() {
        let table = TriggerTable::default_table();
        let hit = table.detect("We have an OUTAGE in eu-west").unwrap();
        assert_eq!(hit.keyword, "outage");
        assert_eq!(hit.event_type, "incident");
    }

    #[test]
    fn test_no_trigger() {
        assert!(TriggerTable::default_table()
            .detect("hello there, how are you")
            .is_none());
    }

    #[test]
    fn test_first_registered_wins() {
        // "document" is registered before "search"
        let hit = TriggerTable::default_table()
            .detect("search this document")
            .unwrap();
        assert_eq!(hit.event_type, "document-added");
    }

    #[test]
    fn test_from_config_normalizes_and_dedupes() {
        let config = TriggerConfig::from_json_str(
            r#"{"keyword_mappings": {"Outage": "Incident", "outage": "other"}}"#,
        )
        .unwrap();
        let table = TriggerTable::from_config(&config).unwrap();

        assert_eq!(table.rules().len(), 1);
        assert_eq!(table.rules()[0].event_type, "incident");
    }

    #[test]
    fn test_empty_keyword_rejected() {
        let err = TriggerConfig::from_json_str(r#"{"keyword_mappings": {" ": "incident"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyTrigger(0)));
    }

    #[test]
    fn test_default_table_matches_compiled_defaults() {
        let compiled = TriggerTable::from_config(&TriggerConfig::default_triggers()).unwrap();
        assert_eq!(compiled, TriggerTable::default_table());
    }
}
