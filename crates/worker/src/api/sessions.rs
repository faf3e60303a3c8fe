// Chat session routes
//
// Signal endpoints queue the signal and answer 202 with the acknowledgement.
// With `?wait=true` they wait for the outcome and for any subordinate start
// the signal caused, then answer with the resulting state.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use flowgate_core::session::{
    Message, QuotaRejection, RateLimitStatus, SessionInit, SessionState, UserType,
    WorkflowReference, DEFAULT_HISTORY_LIMIT,
};
use flowgate_core::SignalOutcome;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::common::{session_error, ApiError, ErrorResponse, ListResponse};
use super::AppState;
use crate::session_actor::{SessionHandle, Signal, SignalAck};

const DEFAULT_TERMINATE_REASON: &str = "terminated by caller";

/// Request body for POST /sessions
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    /// Generated as `chat-<uuid v7>` when absent
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WaitQuery {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct TerminateRequest {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignalAckResponse {
    pub status: SignalAck,
}

#[derive(Debug, Serialize)]
pub struct QuotaExceededResponse {
    pub error: String,
    pub rejection: QuotaRejection,
}

#[derive(Debug, Serialize)]
pub struct InvalidSignalResponse {
    pub error: String,
    pub errors: Vec<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(start_session))
        .route("/sessions/:session_id", get(get_session))
        .route(
            "/sessions/:session_id/messages",
            post(send_message).get(list_messages),
        )
        .route("/sessions/:session_id/trigger", post(trigger_workflow))
        .route("/sessions/:session_id/user", post(update_user))
        .route("/sessions/:session_id/terminate", post(terminate_session))
        .route(
            "/sessions/:session_id/triggered-workflows",
            get(list_triggered_workflows),
        )
        .route("/sessions/:session_id/rate-limit", get(get_rate_limit))
        .with_state(state)
}

fn lookup(state: &AppState, session_id: &str) -> Result<SessionHandle, ApiError> {
    state.registry.get(session_id).map_err(session_error)
}

/// Parse an optional JSON body; only a blank body means "no request"
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes, what: &str) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ErrorResponse::new(format!("invalid {what} body: {e}")).into_response(StatusCode::BAD_REQUEST)
    })
}

// ============================================
// Lifecycle
// ============================================

/// POST /sessions - start a session (201) or return the live one (200)
pub async fn start_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionState>), ApiError> {
    let req: StartSessionRequest = optional_body(&body, "start session")?;
    let session_id = req
        .session_id
        .unwrap_or_else(|| format!("chat-{}", Uuid::now_v7()));

    let init = SessionInit {
        session_id,
        user_id: req.user_id,
        user_type: req.user_type.unwrap_or_default(),
        metadata: req.metadata,
    };
    let started = state.registry.start_session(init).map_err(session_error)?;

    let status = if started.created {
        tracing::info!(session_id = %started.handle.session_id(), "Session started");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(started.handle.state())))
}

/// GET /sessions/{session_id} - current state snapshot
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionState>, ApiError> {
    Ok(Json(lookup(&state, &session_id)?.state()))
}

// ============================================
// Signals
// ============================================

/// POST /sessions/{session_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<WaitQuery>,
    Json(message): Json<Value>,
) -> Result<Response, ApiError> {
    let handle = lookup(&state, &session_id)?;
    Ok(deliver(&handle, Signal::ReceiveMessage(message), query.wait).await)
}

/// POST /sessions/{session_id}/trigger
pub async fn trigger_workflow(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<WaitQuery>,
    Json(event): Json<Value>,
) -> Result<Response, ApiError> {
    let handle = lookup(&state, &session_id)?;
    Ok(deliver(&handle, Signal::TriggerWorkflow(event), query.wait).await)
}

/// POST /sessions/{session_id}/user
pub async fn update_user(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<WaitQuery>,
    Json(user): Json<Value>,
) -> Result<Response, ApiError> {
    let handle = lookup(&state, &session_id)?;
    Ok(deliver(&handle, Signal::UpdateUser(user), query.wait).await)
}

/// POST /sessions/{session_id}/terminate - body `{ "reason": ... }` is optional
pub async fn terminate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<WaitQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let handle = lookup(&state, &session_id)?;

    let request: TerminateRequest = optional_body(&body, "terminate")?;
    let reason = request
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TERMINATE_REASON.to_string());

    Ok(deliver(&handle, Signal::Terminate(reason), query.wait).await)
}

async fn deliver(handle: &SessionHandle, signal: Signal, wait: bool) -> Response {
    if !wait {
        let status = handle.signal(signal).await;
        return (StatusCode::ACCEPTED, Json(SignalAckResponse { status })).into_response();
    }

    let outcome = handle.signal_and_wait(signal).await;
    handle.barrier().await;

    match outcome {
        SignalOutcome::Applied { .. } | SignalOutcome::Duplicate(_) => {
            (StatusCode::OK, Json(handle.state())).into_response()
        }
        SignalOutcome::QuotaExceeded(rejection) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(QuotaExceededResponse {
                error: handle
                    .rate_limit_status()
                    .reason
                    .unwrap_or_else(|| "message quota exceeded".to_string()),
                rejection,
            }),
        )
            .into_response(),
        SignalOutcome::Invalid(errors) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(InvalidSignalResponse {
                error: "invalid signal payload".to_string(),
                errors,
            }),
        )
            .into_response(),
        SignalOutcome::Ignored => ErrorResponse::new(format!(
            "Session {} is terminated",
            handle.session_id()
        ))
        .into_response(StatusCode::CONFLICT)
        .into_response(),
    }
}

// ============================================
// Queries
// ============================================

/// GET /sessions/{session_id}/messages?limit=N - most recent messages, oldest first
pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ListResponse<Message>>, ApiError> {
    let handle = lookup(&state, &session_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(handle.message_history(limit).into()))
}

/// GET /sessions/{session_id}/triggered-workflows
pub async fn list_triggered_workflows(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ListResponse<WorkflowReference>>, ApiError> {
    let handle = lookup(&state, &session_id)?;
    Ok(Json(handle.triggered_workflows().into()))
}

/// GET /sessions/{session_id}/rate-limit
pub async fn get_rate_limit(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<RateLimitStatus>, ApiError> {
    Ok(Json(lookup(&state, &session_id)?.rate_limit_status()))
}
