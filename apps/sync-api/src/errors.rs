//! HTTP error mapping (§7 "User-visible behavior"): every handler error
//! funnels through `ApiError` so the status-code mapping lives in one place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cama_sync_job_manager::JobManagerError;
use cama_sync_models::SyncError;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug)]
pub enum ApiError {
    InputInvalid(String),
    NotFound(String),
    InvalidTransition(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error_code: String,
    message: String,
    correlation_id: Uuid,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let correlation_id = Uuid::new_v4();
        let (status, error_code, message) = match self {
            ApiError::InputInvalid(msg) => (StatusCode::BAD_REQUEST, "INPUT_INVALID", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::InvalidTransition(msg) => (StatusCode::CONFLICT, "INVALID_TRANSITION", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(%correlation_id, %message, "unhandled error on control plane");
        }

        (status, Json(ErrorBody { error_code: error_code.to_string(), message, correlation_id })).into_response()
    }
}

impl From<JobManagerError> for ApiError {
    fn from(err: JobManagerError) -> Self {
        match err {
            JobManagerError::NotFound(id) => ApiError::NotFound(format!("job {id} not found")),
            JobManagerError::InvalidTransition { .. } => ApiError::InvalidTransition(err.to_string()),
            JobManagerError::Repository(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InputInvalid(msg) => ApiError::InputInvalid(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
