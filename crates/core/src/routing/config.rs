// Routing configuration
//
// This is the shape accepted at startup (ROUTING_CONFIG_PATH) and by the
// administrative update operation:
//
// {
//   "event_type_mappings": { "document-added": "document_processing_workflow" },
//   "source_mappings": { "s3": "document_processing_workflow" },
//   "default_workflow": "document_processing_workflow",
//   "workflows": { "document_processing_workflow": { ... } },
//   "priority": ["event_type", "source", "default"]
// }
//
// Mappings keep document order so that "first registered wins" is literal
// when two keys collapse to the same normalized lookup key.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ConfigError, ConfigResult};

/// One priority level considered when matching an event to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingTier {
    /// Match on the normalized `event_type`
    EventType,
    /// Match on the normalized `source`
    Source,
    /// Fall back to the configured default workflow
    Default,
}

impl fmt::Display for RoutingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingTier::EventType => write!(f, "event_type"),
            RoutingTier::Source => write!(f, "source"),
            RoutingTier::Default => write!(f, "default"),
        }
    }
}

/// Tier order used when a configuration does not specify one
pub fn default_priority() -> Vec<RoutingTier> {
    vec![
        RoutingTier::EventType,
        RoutingTier::Source,
        RoutingTier::Default,
    ]
}

fn default_enabled() -> bool {
    true
}

/// A routable target workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    /// Unique key of the workflow in the configuration
    pub workflow_name: String,
    /// Workflow type registered on the engine
    #[serde(alias = "workflow_class")]
    pub workflow_type: String,
    /// Task queue the engine dispatches this workflow on
    pub task_queue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Disabled targets are treated as absent at every tier
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl WorkflowDescriptor {
    pub fn new(
        workflow_name: impl Into<String>,
        workflow_type: impl Into<String>,
        task_queue: impl Into<String>,
    ) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            workflow_type: workflow_type.into(),
            task_queue: task_queue.into(),
            description: None,
            enabled: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the descriptor as disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn validate(&self, key: &str) -> ConfigResult<()> {
        if self.workflow_name.trim().is_empty() {
            return Err(ConfigError::empty_field(key, "workflow_name"));
        }
        if self.workflow_name != key {
            return Err(ConfigError::NameMismatch {
                key: key.to_string(),
                declared: self.workflow_name.clone(),
            });
        }
        if self.workflow_type.trim().is_empty() {
            return Err(ConfigError::empty_field(key, "workflow_type"));
        }
        if self.task_queue.trim().is_empty() {
            return Err(ConfigError::empty_field(key, "task_queue"));
        }
        Ok(())
    }
}

/// String-to-string mapping that remembers insertion (document) order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedMappings(Vec<(String, String)>);

impl OrderedMappings {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an entry; earlier entries keep precedence on duplicates
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// First value registered under exactly this key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OrderedMappings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Serialize for OrderedMappings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for OrderedMappings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = OrderedMappings;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of strings to workflow names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMappings(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Complete routing configuration, replaced wholesale on update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// event_type -> workflow_name
    #[serde(default)]
    pub event_type_mappings: OrderedMappings,
    /// source -> workflow_name
    #[serde(default)]
    pub source_mappings: OrderedMappings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_workflow: Option<String>,
    /// workflow_name -> descriptor
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowDescriptor>,
    /// Order in which tiers are consulted
    #[serde(default = "default_priority")]
    pub priority: Vec<RoutingTier>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self::empty()
    }
}

impl RoutingConfig {
    /// A configuration that routes nothing
    pub fn empty() -> Self {
        Self {
            event_type_mappings: OrderedMappings::new(),
            source_mappings: OrderedMappings::new(),
            default_workflow: None,
            workflows: BTreeMap::new(),
            priority: default_priority(),
        }
    }

    /// The routing configuration the worker starts with when none is supplied
    pub fn default_routing() -> Self {
        Self::empty()
            .with_workflow(
                WorkflowDescriptor::new(
                    "document_processing_workflow",
                    "DocumentProcessingWorkflow",
                    "document_processing-queue",
                )
                .with_description("Processes documents from various sources"),
            )
            .with_workflow(
                WorkflowDescriptor::new(
                    "data_processing_workflow",
                    "DataProcessingWorkflow",
                    "data_processing-queue",
                )
                .with_description("Handles data transformation and analysis"),
            )
            .with_workflow(
                WorkflowDescriptor::new(
                    "incident_workflow",
                    "IncidentWorkflow",
                    "incident_workflow-queue",
                )
                .with_description("Detects, analyzes and notifies on incidents"),
            )
            .with_workflow(
                WorkflowDescriptor::new(
                    "semantic_search_workflow",
                    "SemanticSearchWorkflow",
                    "semantic-search-queue",
                )
                .with_description("Answers questions against indexed documents"),
            )
            .map_event_type("document-added", "document_processing_workflow")
            .map_event_type("document-uploaded", "document_processing_workflow")
            .map_event_type("data-processing", "data_processing_workflow")
            .map_event_type("incident", "incident_workflow")
            .map_event_type("semantic-search", "semantic_search_workflow")
            .map_source("s3", "document_processing_workflow")
            .map_source("azure-blob", "document_processing_workflow")
            .map_source("sharepoint", "document_processing_workflow")
            .with_default("document_processing_workflow")
    }

    /// Register a workflow descriptor under its own name
    pub fn with_workflow(mut self, descriptor: WorkflowDescriptor) -> Self {
        self.workflows
            .insert(descriptor.workflow_name.clone(), descriptor);
        self
    }

    pub fn map_event_type(mut self, event_type: impl Into<String>, workflow: impl Into<String>) -> Self {
        self.event_type_mappings.insert(event_type, workflow);
        self
    }

    pub fn map_source(mut self, source: impl Into<String>, workflow: impl Into<String>) -> Self {
        self.source_mappings.insert(source, workflow);
        self
    }

    pub fn with_default(mut self, workflow: impl Into<String>) -> Self {
        self.default_workflow = Some(workflow.into());
        self
    }

    pub fn with_priority(mut self, priority: Vec<RoutingTier>) -> Self {
        self.priority = priority;
        self
    }

    /// Parse a configuration from JSON text
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from an already-decoded JSON value
    pub fn from_json_value(value: serde_json::Value) -> ConfigResult<Self> {
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Check referential integrity and tier order
    pub fn validate(&self) -> ConfigResult<()> {
        for (key, descriptor) in &self.workflows {
            descriptor.validate(key)?;
        }

        for (key, workflow) in self
            .event_type_mappings
            .iter()
            .chain(self.source_mappings.iter())
        {
            if !self.workflows.contains_key(workflow) {
                return Err(ConfigError::unknown_workflow(key, workflow));
            }
        }

        if let Some(default) = &self.default_workflow {
            if !self.workflows.contains_key(default) {
                return Err(ConfigError::UnknownDefaultWorkflow(default.clone()));
            }
        }

        for (index, tier) in self.priority.iter().enumerate() {
            if self.priority[..index].contains(tier) {
                return Err(ConfigError::DuplicateTier(tier.to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_routing_is_valid() {
        let config = RoutingConfig::default_routing();
        config.validate().unwrap();
        assert_eq!(config.priority, default_priority());
        assert_eq!(
            config.default_workflow.as_deref(),
            Some("document_processing_workflow")
        );
    }

    #[test]
    fn test_parse_admin_update_shape() {
        let config = RoutingConfig::from_json_value(json!({
            "event_type_mappings": {"incident": "incident_workflow"},
            "source_mappings": {"pagerduty": "incident_workflow"},
            "workflows": {
                "incident_workflow": {
                    "workflow_name": "incident_workflow",
                    "workflow_class": "IncidentWorkflow",
                    "task_queue": "incident_workflow-queue"
                }
            }
        }))
        .unwrap();

        let descriptor = &config.workflows["incident_workflow"];
        assert_eq!(descriptor.workflow_type, "IncidentWorkflow");
        assert!(descriptor.enabled);
        assert_eq!(config.priority, default_priority());
        assert!(config.default_workflow.is_none());
    }

    #[test]
    fn test_mappings_keep_document_order() {
        let config: RoutingConfig = serde_json::from_str(
            r#"{
                "event_type_mappings": {"zeta": "a", "alpha": "b", "Zeta": "c"},
                "workflows": {}
            }"#,
        )
        .unwrap();

        let keys: Vec<&str> = config.event_type_mappings.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "Zeta"]);
    }

    #[test]
    fn test_unknown_workflow_rejected() {
        let config = RoutingConfig::empty().map_event_type("incident", "missing");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownWorkflow { .. }));
    }

    #[test]
    fn test_unknown_default_rejected() {
        let config = RoutingConfig::empty().with_default("missing");
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::UnknownDefaultWorkflow(_)
        ));
    }

    #[test]
    fn test_duplicate_tier_rejected() {
        let config = RoutingConfig::empty().with_priority(vec![
            RoutingTier::Source,
            RoutingTier::EventType,
            RoutingTier::Source,
        ]);
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::DuplicateTier(_)
        ));
    }

    #[test]
    fn test_name_mismatch_rejected() {
        let mut config = RoutingConfig::empty();
        config.workflows.insert(
            "a".to_string(),
            WorkflowDescriptor::new("b", "B", "b-queue"),
        );
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::NameMismatch { .. }
        ));
    }

    #[test]
    fn test_serialization_preserves_order() {
        let config = RoutingConfig::default_routing();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = RoutingConfig::from_json_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
