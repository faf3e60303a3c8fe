// Router: event + table -> routing decision
//
// Tiers are consulted in the table's priority order (event_type, source,
// default unless configured otherwise). A rule whose target is disabled is
// treated as absent and routing falls through to the next tier. "No route"
// is an ordinary decision, not an error.

use serde::Serialize;
use tracing::debug;

use super::config::{RoutingTier, WorkflowDescriptor};
use super::table::{normalize_key, RoutingTable};
use crate::event::Event;

/// Output of the router for one event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub matched: bool,
    pub target: Option<WorkflowDescriptor>,
    /// Tier that produced the match
    pub tier: Option<RoutingTier>,
    /// Human-readable diagnostic
    pub reason: String,
    pub normalized_event: Event,
    /// Version of the table the decision was made against
    pub table_version: u64,
}

impl RoutingDecision {
    pub fn workflow_name(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.workflow_name.as_str())
    }
}

/// Stateless router
#[derive(Debug, Clone, Copy, Default)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    /// Route one event against one table snapshot
    pub fn route(&self, event: &Event, table: &RoutingTable) -> RoutingDecision {
        let event_type = normalize_key(event.event_type());
        let source = event.source().map(normalize_key).filter(|s| !s.is_empty());
        let mut skipped: Vec<String> = Vec::new();

        for tier in table.priority() {
            let key = match tier {
                RoutingTier::EventType => Some(event_type.as_str()),
                RoutingTier::Source => source.as_deref(),
                RoutingTier::Default => None,
            };

            let Some(rule) = table.rule_for(*tier, key) else {
                continue;
            };

            if !rule.is_enabled() {
                debug!(
                    tier = %tier,
                    workflow = %rule.target.workflow_name,
                    "Skipping disabled routing target"
                );
                skipped.push(rule.target.workflow_name.clone());
                continue;
            }

            let name = &rule.target.workflow_name;
            let mut reason = match tier {
                RoutingTier::EventType => {
                    format!("routed by event_type '{event_type}' to {name}")
                }
                RoutingTier::Source => format!(
                    "routed by source '{}' to {name}",
                    source.as_deref().unwrap_or_default()
                ),
                RoutingTier::Default => format!("routed to default workflow {name}"),
            };
            append_skipped(&mut reason, &skipped);

            return RoutingDecision {
                matched: true,
                target: Some(rule.target.clone()),
                tier: Some(*tier),
                reason,
                normalized_event: event.clone(),
                table_version: table.version(),
            };
        }

        let mut reason = format!(
            "no rule for event_type={event_type}, source={}",
            source.as_deref().unwrap_or_default()
        );
        append_skipped(&mut reason, &skipped);

        RoutingDecision {
            matched: false,
            target: None,
            tier: None,
            reason,
            normalized_event: event.clone(),
            table_version: table.version(),
        }
    }
}

fn append_skipped(reason: &mut String, skipped: &[String]) {
    if !skipped.is_empty() {
        reason.push_str(&format!(" (skipped disabled: {})", skipped.join(", ")));
    }
}
