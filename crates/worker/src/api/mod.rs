// HTTP API routes
//
// Each submodule exposes `routes(state)`; `router` merges them and adds
// request tracing. All handlers share one AppState.

pub mod admin;
pub mod common;
pub mod events;
pub mod health;
pub mod sessions;

use std::sync::Arc;

use axum::Router;
use flowgate_core::routing::SharedRoutingTable;
use flowgate_core::session::SessionSettings;
use tower_http::trace::TraceLayer;

use crate::dispatcher::EventDispatcher;
use crate::engine::WorkflowStarter;
use crate::registry::SessionRegistry;
use crate::session_actor::SessionRuntimeOptions;

pub use common::{ErrorResponse, ListResponse};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub routing: SharedRoutingTable,
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<EventDispatcher>,
    pub engine: Arc<dyn WorkflowStarter>,
}

impl AppState {
    pub fn new(
        routing: SharedRoutingTable,
        engine: Arc<dyn WorkflowStarter>,
        settings: SessionSettings,
        options: SessionRuntimeOptions,
        workflow_id_prefix: impl Into<String>,
    ) -> Self {
        let registry = SessionRegistry::new(routing.clone(), Arc::clone(&engine), settings, options);
        let dispatcher = EventDispatcher::new(routing.clone(), Arc::clone(&engine), workflow_id_prefix);
        Self {
            routing,
            registry: Arc::new(registry),
            dispatcher: Arc::new(dispatcher),
            engine,
        }
    }
}

/// Build the complete HTTP application
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes(state.clone()))
        .merge(events::routes(state.clone()))
        .merge(admin::routes(state.clone()))
        .merge(sessions::routes(state))
        .layer(TraceLayer::new_for_http())
}
