use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::ApprovalRequest;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("approval request already exists: {0}")]
    DuplicateRequest(String),

    #[error("approval request not found: {0}")]
    NotFound(String),

    #[error("approval {} already resolved as {}", .current.request_id, .current.status)]
    AlreadyResolved {
        /// Authoritative final state, so the losing caller converges.
        current: Box<ApprovalRequest>,
    },

    #[error("approval {request_id} is locked by another decision in flight")]
    LockHeld { request_id: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for ApprovalError {
    fn from(err: sqlx::Error) -> Self {
        ApprovalError::Storage(err.to_string())
    }
}

impl ApprovalError {
    /// Lock and storage failures are transient; callers should back off and
    /// retry. Everything else is terminal for the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApprovalError::LockHeld { .. } | ApprovalError::Storage(_)
        )
    }
}

impl IntoResponse for ApprovalError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            ApprovalError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
                reason.clone(),
            ),
            ApprovalError::DuplicateRequest(id) => (
                StatusCode::CONFLICT,
                "invalid_request_error",
                "duplicate_request",
                format!("approval request '{}' already exists", id),
            ),
            ApprovalError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "not_found",
                format!("approval request '{}' not found", id),
            ),
            ApprovalError::AlreadyResolved { current } => (
                StatusCode::CONFLICT,
                "conflict_error",
                "already_resolved",
                format!(
                    "approval '{}' already resolved as {} by {}",
                    current.request_id,
                    current.status,
                    current.approver.as_deref().unwrap_or("unknown"),
                ),
            ),
            ApprovalError::LockHeld { request_id } => (
                StatusCode::LOCKED,
                "conflict_error",
                "lock_held",
                format!("approval '{}' is locked, retry shortly", request_id),
            ),
            ApprovalError::Storage(e) => {
                tracing::error!("storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        });

        // The losing side of a resolve race gets the final state back.
        if let ApprovalError::AlreadyResolved { current } = &self {
            body["error"]["current"] = serde_json::to_value(current.as_ref()).unwrap_or_default();
        }

        let mut response = (status, Json(body)).into_response();

        // Lock contention is bounded by the lock TTL; hint the retry.
        if matches!(self, ApprovalError::LockHeld { .. }) {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("1"));
        }

        response
    }
}
