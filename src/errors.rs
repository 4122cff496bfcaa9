use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::patch::InvalidField;

/// Outcomes of the approval workflow a caller has to handle.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("a pending change already exists for this record")]
    DuplicatePending,

    #[error("not found")]
    NotFound,

    #[error("request has already been decided")]
    AlreadyDecided,

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl From<sqlx::Error> for WorkflowError {
    fn from(e: sqlx::Error) -> Self {
        WorkflowError::Store(e.into())
    }
}

impl From<InvalidField> for WorkflowError {
    fn from(e: InvalidField) -> Self {
        WorkflowError::ValidationFailed(e.0)
    }
}

impl WorkflowError {
    /// Short label used for metrics and per-item batch results.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::DuplicatePending => "duplicate_pending",
            WorkflowError::NotFound => "not_found",
            WorkflowError::AlreadyDecided => "already_decided",
            WorkflowError::ValidationFailed(_) => "validation_failed",
            WorkflowError::Forbidden(_) => "forbidden",
            WorkflowError::Store(_) => "store_error",
        }
    }
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing or invalid service key")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                "invalid or missing service key".to_string(),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                msg.clone(),
            ),
            AppError::Workflow(e) => match e {
                WorkflowError::ValidationFailed(msg) => (
                    StatusCode::BAD_REQUEST,
                    "invalid_request_error",
                    e.code(),
                    msg.clone(),
                ),
                WorkflowError::Forbidden(msg) => (
                    StatusCode::FORBIDDEN,
                    "permission_error",
                    e.code(),
                    msg.clone(),
                ),
                WorkflowError::NotFound => (
                    StatusCode::NOT_FOUND,
                    "not_found_error",
                    e.code(),
                    "resource not found".to_string(),
                ),
                WorkflowError::DuplicatePending | WorkflowError::AlreadyDecided => (
                    StatusCode::CONFLICT,
                    "conflict_error",
                    e.code(),
                    e.to_string(),
                ),
                WorkflowError::Store(inner) => {
                    tracing::error!("Store error: {:#}", inner);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "internal_server_error",
                        "internal server error".to_string(),
                    )
                }
            },
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: WorkflowError) -> StatusCode {
        AppError::from(e).into_response().status()
    }

    #[test]
    fn test_workflow_errors_map_to_http_status() {
        assert_eq!(status_of(WorkflowError::ValidationFailed("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(WorkflowError::Forbidden("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_of(WorkflowError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(WorkflowError::DuplicatePending), StatusCode::CONFLICT);
        assert_eq!(status_of(WorkflowError::AlreadyDecided), StatusCode::CONFLICT);
        assert_eq!(
            status_of(WorkflowError::Store(anyhow::anyhow!("connection reset"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_invalid_field_becomes_validation_failed() {
        let e: WorkflowError = InvalidField("hours must be a number".into()).into();
        assert!(matches!(
            e,
            WorkflowError::ValidationFailed(ref m) if m == "hours must be a number"
        ));
        assert_eq!(e.code(), "validation_failed");
    }
}
