use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::{CancelOutcome, CreateError, ResolveOutcome};
use crate::errors::AppError;
use crate::models::approval::ApprovalRequest;
use crate::models::session::{AgentSession, SessionStatus};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct CreateApprovalRequest {
    pub session_id: String,
    pub agent_id: String,
    pub request_details: serde_json::Value,
    pub timeout_minutes: Option<i64>,
}

#[derive(Serialize)]
pub struct CreateApprovalResponse {
    pub id: Uuid,
    pub status: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub decision: String, // "approve" | "reject"
    pub approved_by: String,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct RegisterSessionRequest {
    pub session_id: String,
    pub agent_id: String,
    pub status: Option<SessionStatus>,
}

// ── Approval Handlers ────────────────────────────────────────

/// POST /api/v1/approvals — create a pending approval request.
/// This is the entry point the session-dispatch side calls when an agent
/// hits an action that needs a human decision.
pub async fn create_approval(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateApprovalRequest>,
) -> Result<(StatusCode, Json<CreateApprovalResponse>), AppError> {
    let record = state
        .coordinator
        .create(
            &payload.session_id,
            &payload.agent_id,
            payload.request_details,
            payload.timeout_minutes,
        )
        .await
        .map_err(|e| match e {
            CreateError::InvalidInput(reason) => AppError::Validation(reason),
            CreateError::Storage(e) => AppError::Internal(e),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateApprovalResponse {
            id: record.id,
            status: record.status.to_string(),
            expires_at: record.expires_at,
        }),
    ))
}

/// GET /api/v1/approvals — list pending approval requests
pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ApprovalRequest>>, AppError> {
    let approvals = state.coordinator.list_pending().await?;
    Ok(Json(approvals))
}

/// GET /api/v1/approvals/:id — fetch a single approval (any state)
pub async fn get_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalRequest>, AppError> {
    let record = state
        .coordinator
        .get(id)
        .await?
        .ok_or(AppError::ApprovalNotFound)?;
    Ok(Json(record))
}

/// POST /api/v1/approvals/:id/decision — approve or reject a request
pub async fn decide_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<ApprovalRequest>, AppError> {
    let approved = match payload.decision.to_lowercase().as_str() {
        "approve" | "approved" => true,
        "reject" | "rejected" => false,
        other => {
            return Err(AppError::Validation(format!(
                "decision must be 'approve' or 'reject', got '{}'",
                other
            )));
        }
    };
    if payload.approved_by.trim().is_empty() {
        return Err(AppError::Validation("approved_by must not be empty".into()));
    }

    match state
        .coordinator
        .resolve(id, approved, &payload.approved_by, payload.notes)
        .await?
    {
        ResolveOutcome::Resolved(record) => Ok(Json(record)),
        other => Err(AppError::from_resolve_outcome(other)),
    }
}

/// POST /api/v1/approvals/:id/cancel — administrative cancellation
pub async fn cancel_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<ApprovalRequest>, AppError> {
    if payload.reason.trim().is_empty() {
        return Err(AppError::Validation("reason must not be empty".into()));
    }

    match state.coordinator.cancel(id, &payload.reason).await? {
        CancelOutcome::Cancelled(record) => Ok(Json(record)),
        other => Err(AppError::from_cancel_outcome(other)),
    }
}

// ── Session Handlers ─────────────────────────────────────────

/// POST /api/v1/sessions — register a tracked agent session
pub async fn register_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterSessionRequest>,
) -> Result<(StatusCode, Json<AgentSession>), AppError> {
    if payload.session_id.trim().is_empty() || payload.agent_id.trim().is_empty() {
        return Err(AppError::Validation(
            "session_id and agent_id must not be empty".into(),
        ));
    }

    let session = state.sessions.register(
        &payload.session_id,
        &payload.agent_id,
        payload.status.unwrap_or(SessionStatus::Running),
    );
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/v1/sessions — list tracked sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<AgentSession>> {
    Json(state.sessions.list())
}

/// GET /api/v1/sessions/:id — fetch one session
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AgentSession>, AppError> {
    state
        .sessions
        .get(&id)
        .map(Json)
        .ok_or(AppError::SessionNotFound)
}
