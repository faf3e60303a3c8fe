// Event dispatcher: validate -> route -> start
//
// Inbound events (webhooks, object-store notifications, bus messages) are
// validated, routed against the current routing snapshot and, when matched,
// started on the target's task queue as
// `<prefix>-<event_type>-<uuid v7>` with the normalized event as input.

use std::sync::Arc;

use flowgate_core::routing::{RoutingDecision, RoutingService, SharedRoutingTable};
use flowgate_core::session::StartRequest;
use flowgate_core::ValidationResult;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{start_logged, StartedWorkflow, WorkflowStarter};

/// Coarse result of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Invalid,
    Unmatched,
    Started,
    StartFailed,
}

/// Everything the dispatcher learned about one event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    pub validation: ValidationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<RoutingDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<StartedWorkflow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_error: Option<String>,
}

pub struct EventDispatcher {
    routing: SharedRoutingTable,
    engine: Arc<dyn WorkflowStarter>,
    service: RoutingService,
    workflow_id_prefix: String,
}

impl EventDispatcher {
    pub fn new(
        routing: SharedRoutingTable,
        engine: Arc<dyn WorkflowStarter>,
        workflow_id_prefix: impl Into<String>,
    ) -> Self {
        Self {
            routing,
            engine,
            service: RoutingService::new(),
            workflow_id_prefix: workflow_id_prefix.into(),
        }
    }

    pub async fn dispatch(&self, raw_event: &Value) -> DispatchOutcome {
        let table = self.routing.snapshot();
        let (validation, decision) = self.service.process_event(raw_event, &table);

        let Some(decision) = decision else {
            debug!(errors = validation.errors.len(), "Dropping invalid event");
            return DispatchOutcome {
                status: DispatchStatus::Invalid,
                validation,
                decision: None,
                started: None,
                start_error: None,
            };
        };

        let Some(target) = decision.target.clone().filter(|_| decision.matched) else {
            info!(reason = %decision.reason, "Event not routed");
            return DispatchOutcome {
                status: DispatchStatus::Unmatched,
                validation,
                decision: Some(decision),
                started: None,
                start_error: None,
            };
        };

        let event = &decision.normalized_event;
        let request = StartRequest {
            workflow_id: format!(
                "{}-{}-{}",
                self.workflow_id_prefix,
                event.event_type(),
                Uuid::now_v7()
            ),
            workflow_name: target.workflow_name,
            workflow_type: target.workflow_type,
            task_queue: target.task_queue,
            input: event.to_wire(),
            parent_session_id: None,
        };

        match start_logged(self.engine.as_ref(), request).await {
            Ok(started) => DispatchOutcome {
                status: DispatchStatus::Started,
                validation,
                decision: Some(decision),
                started: Some(started),
                start_error: None,
            },
            Err(e) => DispatchOutcome {
                status: DispatchStatus::StartFailed,
                validation,
                decision: Some(decision),
                started: None,
                start_error: Some(e.to_string()),
            },
        }
    }
}
