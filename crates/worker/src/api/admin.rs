// Routing administration
//
// PUT takes the raw body so mapping order survives parsing; a
// serde_json::Value would re-sort the keys.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use flowgate_core::RoutingConfig;
use serde::Serialize;

use super::common::{ApiError, ErrorResponse};
use super::AppState;

#[derive(Debug, Serialize)]
pub struct RoutingResponse {
    pub version: u64,
    pub config: RoutingConfig,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/admin/routing", get(get_routing).put(update_routing))
        .with_state(state)
}

/// GET /admin/routing - configuration currently in force
pub async fn get_routing(State(state): State<AppState>) -> Json<RoutingResponse> {
    let table = state.routing.snapshot();
    Json(RoutingResponse {
        version: table.version(),
        config: table.config().clone(),
    })
}

/// PUT /admin/routing - replace the configuration wholesale
pub async fn update_routing(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<RoutingResponse>, ApiError> {
    let config = RoutingConfig::from_json_str(&body).map_err(|e| {
        tracing::warn!(error = %e, "Rejected routing configuration");
        ErrorResponse::new(e.to_string()).into_response(StatusCode::BAD_REQUEST)
    })?;

    let version = state
        .routing
        .update_configuration(config.clone())
        .map_err(|e| {
            tracing::warn!(error = %e, "Rejected routing configuration");
            ErrorResponse::new(e.to_string()).into_response(StatusCode::BAD_REQUEST)
        })?;

    tracing::info!(version, "Routing configuration replaced");
    Ok(Json(RoutingResponse { version, config }))
}
