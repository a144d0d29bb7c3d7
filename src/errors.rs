use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::approval::{CancelOutcome, ResolveOutcome};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("approval not found")]
    ApprovalNotFound,

    #[error("approval already resolved as {status}")]
    AlreadyResolved { status: String },

    #[error("approval already cancelled: {reason}")]
    AlreadyCancelled { reason: String },

    #[error("approval deadline passed")]
    ApprovalExpired,

    #[error("session not found")]
    SessionNotFound,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Terminal-state guard rejection for a resolve attempt. `Resolved` is
    /// the success arm and must be handled by the caller first.
    pub fn from_resolve_outcome(outcome: ResolveOutcome) -> Self {
        match outcome {
            ResolveOutcome::Resolved(_) => {
                AppError::Internal(anyhow::anyhow!("resolved outcome is not an error"))
            }
            ResolveOutcome::NotFound => AppError::ApprovalNotFound,
            ResolveOutcome::AlreadyResolved { status } => AppError::AlreadyResolved {
                status: status.to_string(),
            },
            ResolveOutcome::AlreadyCancelled { reason } => AppError::AlreadyCancelled { reason },
            ResolveOutcome::Expired => AppError::ApprovalExpired,
        }
    }

    pub fn from_cancel_outcome(outcome: CancelOutcome) -> Self {
        match outcome {
            CancelOutcome::Cancelled(_) => {
                AppError::Internal(anyhow::anyhow!("cancelled outcome is not an error"))
            }
            CancelOutcome::NotFound => AppError::ApprovalNotFound,
            CancelOutcome::AlreadyTerminal { status } => AppError::AlreadyResolved {
                status: status.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::ApprovalNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "approval_not_found",
                "approval request not found".to_string(),
            ),
            AppError::AlreadyResolved { status } => (
                StatusCode::CONFLICT,
                "conflict_error",
                "approval_already_resolved",
                format!("approval already resolved as {}", status),
            ),
            AppError::AlreadyCancelled { reason } => (
                StatusCode::CONFLICT,
                "conflict_error",
                "approval_already_cancelled",
                format!("approval already cancelled: {}", reason),
            ),
            AppError::ApprovalExpired => (
                StatusCode::GONE,
                "timeout_error",
                "approval_expired",
                "approval deadline passed".to_string(),
            ),
            AppError::SessionNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "session_not_found",
                "session not found".to_string(),
            ),
            AppError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
                reason.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
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
