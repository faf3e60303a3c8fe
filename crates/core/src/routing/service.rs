// Validate-then-route facade used by the worker's event dispatcher

use tracing::{debug, warn};

use super::router::{Router, RoutingDecision};
use super::table::RoutingTable;
use crate::validation::{EventValidator, ValidationResult};

/// Combines the validator and the router
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingService {
    validator: EventValidator,
    router: Router,
}

impl RoutingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a raw event and, if valid, route it
    ///
    /// The routing decision is `None` exactly when validation failed.
    pub fn process_event(
        &self,
        raw_event: &serde_json::Value,
        table: &RoutingTable,
    ) -> (ValidationResult, Option<RoutingDecision>) {
        let validation = self.validator.validate(raw_event);

        let Some(event) = validation.normalized_event.as_ref() else {
            warn!(errors = ?validation.errors, "Event validation failed");
            return (validation, None);
        };

        let decision = self.router.route(event, table);
        debug!(
            event_type = %event.event_type(),
            matched = decision.matched,
            reason = %decision.reason,
            "Event routed"
        );

        (validation, Some(decision))
    }
}
