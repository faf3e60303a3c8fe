// Compiled routing table and its shared, hot-swappable handle
//
// A RoutingTable is immutable once compiled. Updates compile a complete new
// table outside any lock and then swap a single Arc under a short write
// lock, so a reader holds either the old table or the new one in full.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use super::config::{OrderedMappings, RoutingConfig, RoutingTier, WorkflowDescriptor};
use crate::error::ConfigResult;

/// Lookup key of one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MatchKey {
    EventType(String),
    Source(String),
    Default,
}

/// One entry of the routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingRule {
    pub match_key: MatchKey,
    pub tier: RoutingTier,
    pub target: WorkflowDescriptor,
    /// Position of the mapping in the configuration it came from
    pub registration_index: usize,
}

impl RoutingRule {
    pub fn is_enabled(&self) -> bool {
        self.target.enabled
    }
}

/// Immutable, versioned routing table
#[derive(Debug, Clone)]
pub struct RoutingTable {
    version: u64,
    event_type_rules: HashMap<String, RoutingRule>,
    source_rules: HashMap<String, RoutingRule>,
    default_rule: Option<RoutingRule>,
    priority: Vec<RoutingTier>,
    config: RoutingConfig,
}

/// Normalize a lookup key the same way the validator normalizes events
pub(crate) fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

impl RoutingTable {
    /// Compile a configuration into a table with version 0
    pub fn from_config(config: RoutingConfig) -> ConfigResult<Self> {
        config.validate()?;

        let event_type_rules = compile_tier(
            &config,
            &config.event_type_mappings,
            RoutingTier::EventType,
        );
        let source_rules = compile_tier(&config, &config.source_mappings, RoutingTier::Source);
        let default_rule = config.default_workflow.as_ref().and_then(|name| {
            config.workflows.get(name).map(|target| RoutingRule {
                match_key: MatchKey::Default,
                tier: RoutingTier::Default,
                target: target.clone(),
                registration_index: 0,
            })
        });

        Ok(Self {
            version: 0,
            event_type_rules,
            source_rules,
            default_rule,
            priority: config.priority.clone(),
            config,
        })
    }

    /// A table that routes nothing
    pub fn empty() -> Self {
        Self {
            version: 0,
            event_type_rules: HashMap::new(),
            source_rules: HashMap::new(),
            default_rule: None,
            priority: RoutingConfig::empty().priority,
            config: RoutingConfig::empty(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Tiers in the order they are consulted
    pub fn priority(&self) -> &[RoutingTier] {
        &self.priority
    }

    /// The configuration this table was compiled from
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Rule registered for `key` at `tier`, enabled or not
    ///
    /// `key` must already be normalized; it is ignored for the default tier.
    pub fn rule_for(&self, tier: RoutingTier, key: Option<&str>) -> Option<&RoutingRule> {
        match tier {
            RoutingTier::EventType => key.and_then(|k| self.event_type_rules.get(k)),
            RoutingTier::Source => key.and_then(|k| self.source_rules.get(k)),
            RoutingTier::Default => self.default_rule.as_ref(),
        }
    }

    /// All rules, ordered by tier and registration
    pub fn rules(&self) -> Vec<&RoutingRule> {
        let mut rules: Vec<&RoutingRule> = self
            .event_type_rules
            .values()
            .chain(self.source_rules.values())
            .chain(self.default_rule.iter())
            .collect();
        rules.sort_by_key(|rule| (tier_rank(rule.tier), rule.registration_index));
        rules
    }
}

fn tier_rank(tier: RoutingTier) -> u8 {
    match tier {
        RoutingTier::EventType => 0,
        RoutingTier::Source => 1,
        RoutingTier::Default => 2,
    }
}

fn compile_tier(
    config: &RoutingConfig,
    mappings: &OrderedMappings,
    tier: RoutingTier,
) -> HashMap<String, RoutingRule> {
    let mut rules: HashMap<String, RoutingRule> = HashMap::with_capacity(mappings.len());

    for (index, (raw_key, workflow_name)) in mappings.iter().enumerate() {
        let key = normalize_key(raw_key);
        if key.is_empty() {
            warn!(tier = %tier, "Ignoring mapping with an empty key");
            continue;
        }
        // validate() guarantees the workflow exists
        let Some(target) = config.workflows.get(workflow_name) else {
            continue;
        };

        // First enabled registration wins; a disabled one only holds the key
        // until an enabled one shows up
        if let Some(existing) = rules.get(&key) {
            if existing.is_enabled() || !target.enabled {
                warn!(
                    tier = %tier,
                    key = %key,
                    kept = %existing.target.workflow_name,
                    ignored = %workflow_name,
                    "Duplicate routing key after normalization, first registered wins"
                );
                continue;
            }
            warn!(
                tier = %tier,
                key = %key,
                disabled = %existing.target.workflow_name,
                kept = %workflow_name,
                "Duplicate routing key after normalization, enabled target replaces disabled one"
            );
        }

        let match_key = match tier {
            RoutingTier::EventType => MatchKey::EventType(key.clone()),
            RoutingTier::Source => MatchKey::Source(key.clone()),
            RoutingTier::Default => MatchKey::Default,
        };

        rules.insert(
            key,
            RoutingRule {
                match_key,
                tier,
                target: target.clone(),
                registration_index: index,
            },
        );
    }

    rules
}

/// Shared handle to the current routing table
///
/// Cloning the handle is cheap; all clones observe the same table.
#[derive(Debug, Clone)]
pub struct SharedRoutingTable {
    inner: Arc<RwLock<Arc<RoutingTable>>>,
}

impl SharedRoutingTable {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    /// Compile a configuration and wrap it in a shared handle
    pub fn from_config(config: RoutingConfig) -> ConfigResult<Self> {
        Ok(Self::new(RoutingTable::from_config(config)?))
    }

    /// Current table; the read lock is held only for the Arc clone
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.inner.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version()
    }

    /// Configuration the current table was compiled from
    pub fn current_config(&self) -> RoutingConfig {
        self.inner.read().config().clone()
    }

    /// Replace the whole table atomically
    ///
    /// On error the current table stays in force. Returns the new version.
    pub fn update_configuration(&self, config: RoutingConfig) -> ConfigResult<u64> {
        let mut table = RoutingTable::from_config(config)?;

        let mut current = self.inner.write();
        table.version = current.version() + 1;
        let version = table.version;
        *current = Arc::new(table);
        drop(current);

        info!(version, "Routing configuration updated");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    fn workflow(name: &str) -> WorkflowDescriptor {
        WorkflowDescriptor::new(name, name.to_uppercase(), format!("{name}-queue"))
    }

    #[test]
    fn test_keys_are_normalized() {
        let config = RoutingConfig::empty()
            .with_workflow(workflow("incident_workflow"))
            .map_event_type(" Incident ", "incident_workflow");
        let table = RoutingTable::from_config(config).unwrap();

        let rule = table
            .rule_for(RoutingTier::EventType, Some("incident"))
            .unwrap();
        assert_eq!(rule.target.workflow_name, "incident_workflow");
        assert_eq!(rule.match_key, MatchKey::EventType("incident".to_string()));
    }

    #[test]
    fn test_first_registered_wins_on_collision() {
        let config = RoutingConfig::empty()
            .with_workflow(workflow("first"))
            .with_workflow(workflow("second"))
            .map_source("S3", "first")
            .map_source("s3", "second");
        let table = RoutingTable::from_config(config).unwrap();

        let rule = table.rule_for(RoutingTier::Source, Some("s3")).unwrap();
        assert_eq!(rule.target.workflow_name, "first");
        assert_eq!(rule.registration_index, 0);
    }

    #[test]
    fn test_rules_ordering() {
        let table = RoutingTable::from_config(RoutingConfig::default_routing()).unwrap();
        let rules = table.rules();
        assert_eq!(rules.first().unwrap().tier, RoutingTier::EventType);
        assert_eq!(rules.last().unwrap().tier, RoutingTier::Default);
        assert_eq!(rules.len(), 5 + 3 + 1);
    }

    #[test]
    fn test_update_bumps_version() {
        let shared = SharedRoutingTable::from_config(RoutingConfig::default_routing()).unwrap();
        assert_eq!(shared.version(), 0);

        let before = shared.snapshot();
        let version = shared
            .update_configuration(RoutingConfig::empty())
            .unwrap();
        assert_eq!(version, 1);

        // Snapshots taken before the update keep the old table
        assert_eq!(before.version(), 0);
        assert!(before.rule_for(RoutingTier::Default, None).is_some());
        assert!(shared
            .snapshot()
            .rule_for(RoutingTier::Default, None)
            .is_none());
    }

    #[test]
    fn test_failed_update_keeps_current_table() {
        let shared = SharedRoutingTable::from_config(RoutingConfig::default_routing()).unwrap();
        let bad = RoutingConfig::empty().map_event_type("incident", "nowhere");

        let err = shared.update_configuration(bad).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownWorkflow { .. }));
        assert_eq!(shared.version(), 0);
        assert_eq!(shared.snapshot().config(), &RoutingConfig::default_routing());
    }
}
