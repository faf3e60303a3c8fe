// Inbound event endpoint

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;

use super::AppState;
use crate::dispatcher::{DispatchOutcome, DispatchStatus};

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/events", post(dispatch_event))
        .with_state(state)
}

/// POST /events - validate, route and start the matching workflow
///
/// 202 started, 200 unmatched, 422 invalid event, 502 engine refused the start.
pub async fn dispatch_event(
    State(state): State<AppState>,
    Json(event): Json<Value>,
) -> (StatusCode, Json<DispatchOutcome>) {
    let outcome = state.dispatcher.dispatch(&event).await;
    let status = match outcome.status {
        DispatchStatus::Started => StatusCode::ACCEPTED,
        DispatchStatus::Unmatched => StatusCode::OK,
        DispatchStatus::Invalid => StatusCode::UNPROCESSABLE_ENTITY,
        DispatchStatus::StartFailed => StatusCode::BAD_GATEWAY,
    };
    (status, Json(outcome))
}
