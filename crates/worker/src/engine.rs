// Durable-execution engine client abstraction
// Decision: Callers depend on the WorkflowStarter trait, not on a transport
// Decision: InMemoryEngine backs tests and ENGINE_MODE=memory
//
// The engine owns workflow execution and persistence; the worker only asks
// it to start workflows and reports whether it is reachable.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use flowgate_core::session::StartRequest;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Errors returned by engine clients
#[derive(Debug, Error)]
pub enum EngineError {
    /// The channel to the engine failed
    #[error("engine transport error: {0}")]
    Transport(String),

    /// The engine answered with an RPC error
    #[error("engine rejected {workflow_id}: {message}")]
    Rejected { workflow_id: String, message: String },

    /// The workflow input could not be encoded
    #[error("failed to encode workflow input: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Engine acknowledgement of a started workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedWorkflow {
    pub workflow_id: String,
    pub run_id: String,
}

/// Starts workflows on the engine
#[async_trait]
pub trait WorkflowStarter: Send + Sync {
    async fn start_workflow(&self, request: StartRequest) -> Result<StartedWorkflow, EngineError>;

    /// Single probe used by the health endpoint
    async fn ping(&self) -> bool;
}

/// In-process engine that records every start request
#[derive(Debug, Clone, Default)]
pub struct InMemoryEngine {
    inner: Arc<Mutex<InMemoryState>>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    started: Vec<StartRequest>,
    failing_types: HashSet<String>,
    unavailable: bool,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every start of `workflow_type`
    pub fn fail_workflow_type(&self, workflow_type: impl Into<String>) {
        self.inner.lock().failing_types.insert(workflow_type.into());
    }

    /// Make pings and starts fail as if the engine were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// Requests accepted so far, in order
    pub fn started(&self) -> Vec<StartRequest> {
        self.inner.lock().started.clone()
    }

    pub fn started_count(&self) -> usize {
        self.inner.lock().started.len()
    }
}

#[async_trait]
impl WorkflowStarter for InMemoryEngine {
    async fn start_workflow(&self, request: StartRequest) -> Result<StartedWorkflow, EngineError> {
        let mut state = self.inner.lock();
        if state.unavailable {
            return Err(EngineError::Transport("engine unavailable".to_string()));
        }
        if state.failing_types.contains(&request.workflow_type) {
            return Err(EngineError::Rejected {
                workflow_id: request.workflow_id,
                message: format!("workflow type {} is not registered", request.workflow_type),
            });
        }
        if state.started.iter().any(|r| r.workflow_id == request.workflow_id) {
            return Err(EngineError::Rejected {
                workflow_id: request.workflow_id,
                message: "workflow execution already started".to_string(),
            });
        }

        let started = StartedWorkflow {
            workflow_id: request.workflow_id.clone(),
            run_id: Uuid::now_v7().to_string(),
        };
        debug!(
            workflow_id = %request.workflow_id,
            workflow_type = %request.workflow_type,
            task_queue = %request.task_queue,
            "In-memory engine accepted workflow"
        );
        state.started.push(request);
        Ok(started)
    }

    async fn ping(&self) -> bool {
        !self.inner.lock().unavailable
    }
}

/// Run a start and log its outcome
///
/// Used by both the dispatcher and the session runtime so every start is
/// logged the same way.
pub async fn start_logged(
    engine: &dyn WorkflowStarter,
    request: StartRequest,
) -> Result<StartedWorkflow, EngineError> {
    let workflow_id = request.workflow_id.clone();
    let workflow_type = request.workflow_type.clone();
    info!(
        workflow_id = %workflow_id,
        workflow_type = %workflow_type,
        task_queue = %request.task_queue,
        "Starting workflow"
    );

    let result = engine.start_workflow(request).await;
    match &result {
        Ok(started) => info!(
            workflow_id = %started.workflow_id,
            run_id = %started.run_id,
            "Workflow started successfully"
        ),
        Err(e) => tracing::error!(workflow_id = %workflow_id, error = %e, "Failed to start workflow"),
    }
    result
}
