//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::control::ControlError;
use crate::dispatcher::DispatchError;
use crate::resolver::ResolveError;
use crate::store::StoreError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => {
                tracing::error!("Dependency unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Malformed(e) => ApiError::BadRequest(e.to_string()),
            DispatchError::SequenceNotFound { .. } => ApiError::NotFound(err.to_string()),
            DispatchError::Definition(ResolveError::NotFound(_)) => {
                ApiError::NotFound(err.to_string())
            }
            DispatchError::Definition(ResolveError::Parse(_)) => {
                ApiError::BadRequest(err.to_string())
            }
            DispatchError::Definition(ResolveError::StoreUnavailable(_)) => {
                ApiError::Unavailable(err.to_string())
            }
            DispatchError::Store(StoreError::NotFound(_)) => ApiError::NotFound(err.to_string()),
            DispatchError::Store(_) => ApiError::Conflict(err.to_string()),
            DispatchError::Transport(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ControlError::InvalidStateTransition { .. } => ApiError::Conflict(err.to_string()),
            ControlError::Dispatch(inner) => inner.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
