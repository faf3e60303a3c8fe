// Shared response types for the HTTP API

use axum::http::StatusCode;
use axum::Json;
use flowgate_core::SessionError;
use serde::{Deserialize, Serialize};

/// Standard error body: `{ "error": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Convert to axum response tuple
    pub fn into_response(self, status: StatusCode) -> (StatusCode, Json<Self>) {
        (status, Json(self))
    }
}

/// Error half of handler results
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// List endpoints wrap their items in a `data` field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

impl From<SessionError> for ErrorResponse {
    fn from(e: SessionError) -> Self {
        ErrorResponse::new(e.to_string())
    }
}

pub fn session_error(e: SessionError) -> ApiError {
    let status = match e {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::InvalidId => StatusCode::BAD_REQUEST,
        SessionError::Closed(_) => StatusCode::CONFLICT,
    };
    ErrorResponse::from(e).into_response(status)
}
