//! Approval request lifecycle coordinator.
//!
//! Sole authority for creating and terminating approval records. Two
//! independent callers can target the same request at once: an operator
//! decision arriving through the API/CLI and the expiry sweep cancelling
//! overdue requests. Every transition goes through the store's
//! compare-and-set on `Pending`, so exactly one caller wins and the losers
//! observe the winner's terminal state. Terminal-state rejections are
//! ordinary outcome values, not errors: they are the expected result of
//! the race.

use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::approval::{ApprovalRequest, ApprovalStatus, TIMEOUT_REASON};
use crate::notification::telegram::TelegramNotifier;
use crate::notification::webhook::{ResolutionEvents, WebhookEvent};
use crate::sessions::SessionDirectory;
use crate::store::ApprovalStore;

/// Bounds for the per-request timeout. Requests outside this range are
/// rejected at creation; the default comes from configuration.
pub const MIN_TIMEOUT_MINUTES: i64 = 1;
pub const MAX_TIMEOUT_MINUTES: i64 = 1440;

#[derive(Debug, Error)]
pub enum CreateError {
    #[error("invalid approval request: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug)]
pub enum ResolveOutcome {
    /// This caller won the transition; the record is now terminal.
    Resolved(ApprovalRequest),
    NotFound,
    AlreadyResolved { status: ApprovalStatus },
    AlreadyCancelled { reason: String },
    /// Deadline passed. The stored record may still read `Pending` until
    /// the sweep commits the cancellation, but no resolution is accepted
    /// past the deadline regardless of sweep latency.
    Expired,
}

#[derive(Debug)]
pub enum ExpireOutcome {
    Expired(ApprovalRequest),
    /// Deadline not reached; nothing to do.
    NotYetDue,
    /// Record already terminal, the expected result of losing the race
    /// against an operator decision. A no-op, not an error.
    AlreadyTerminal { status: ApprovalStatus },
    NotFound,
}

#[derive(Debug)]
pub enum CancelOutcome {
    Cancelled(ApprovalRequest),
    AlreadyTerminal { status: ApprovalStatus },
    NotFound,
}

pub struct ApprovalCoordinator {
    store: Arc<dyn ApprovalStore>,
    sessions: Arc<SessionDirectory>,
    notifier: TelegramNotifier,
    events: ResolutionEvents,
    default_timeout_minutes: i64,
}

impl ApprovalCoordinator {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        sessions: Arc<SessionDirectory>,
        notifier: TelegramNotifier,
        events: ResolutionEvents,
        default_timeout_minutes: i64,
    ) -> Self {
        Self {
            store,
            sessions,
            notifier,
            events,
            default_timeout_minutes,
        }
    }

    /// Create a pending approval request and notify the operator channel.
    ///
    /// Notification is fire-and-forget: the request exists and is resolvable
    /// (e.g. via the CLI) even if Telegram is down. Fails only on invalid
    /// input or storage errors.
    pub async fn create(
        &self,
        session_id: &str,
        agent_id: &str,
        request_details: serde_json::Value,
        timeout_minutes: Option<i64>,
    ) -> Result<ApprovalRequest, CreateError> {
        if session_id.trim().is_empty() {
            return Err(CreateError::InvalidInput("session_id must not be empty".into()));
        }
        if agent_id.trim().is_empty() {
            return Err(CreateError::InvalidInput("agent_id must not be empty".into()));
        }

        let timeout = timeout_minutes.unwrap_or(self.default_timeout_minutes);
        if !(MIN_TIMEOUT_MINUTES..=MAX_TIMEOUT_MINUTES).contains(&timeout) {
            return Err(CreateError::InvalidInput(format!(
                "timeout_minutes must be between {} and {}, got {}",
                MIN_TIMEOUT_MINUTES, MAX_TIMEOUT_MINUTES, timeout
            )));
        }

        let now = Utc::now();
        let record = ApprovalRequest {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            status: ApprovalStatus::Pending,
            request_details,
            approved_by: None,
            approved_at: None,
            decision_notes: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::minutes(timeout),
        };

        self.store.insert(&record).await?;

        info!(
            approval_id = %record.id,
            session_id,
            agent_id,
            timeout_minutes = timeout,
            "approval request created"
        );

        let notifier = self.notifier.clone();
        let for_notify = record.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_approval_request(&for_notify).await {
                warn!(
                    approval_id = %for_notify.id,
                    error = %e,
                    "approval notification failed, request remains resolvable"
                );
            }
        });

        Ok(record)
    }

    /// Apply an operator decision.
    ///
    /// The read, guard checks and CAS run against the same `Pending`
    /// expectation, so a concurrent expire or second decision makes the CAS
    /// fail and this caller reports the winner's terminal state instead of
    /// overwriting it.
    pub async fn resolve(
        &self,
        id: Uuid,
        approved: bool,
        approved_by: &str,
        notes: Option<String>,
    ) -> anyhow::Result<ResolveOutcome> {
        let Some(record) = self.store.get(id).await? else {
            return Ok(ResolveOutcome::NotFound);
        };

        if let Some(outcome) = Self::resolve_guard(&record) {
            return Ok(outcome);
        }

        let now = Utc::now();
        if record.is_expired(now) {
            // Deadline enforcement independent of the sweep: even if the
            // sweep hasn't physically cancelled the record yet, no decision
            // is accepted past the deadline.
            debug!(approval_id = %id, expires_at = %record.expires_at, "resolve rejected, deadline passed");
            return Ok(ResolveOutcome::Expired);
        }

        let mut updated = record.clone();
        updated.updated_at = now;
        updated.decision_notes = notes;
        if approved {
            updated.status = ApprovalStatus::Approved;
            updated.approved_at = Some(now);
            updated.approved_by = Some(approved_by.to_string());
        } else {
            updated.status = ApprovalStatus::Rejected;
        }

        if !self
            .store
            .compare_and_set_status(id, ApprovalStatus::Pending, &updated)
            .await?
        {
            // Lost the race; report whatever terminal state won.
            return match self.store.get(id).await? {
                Some(current) => Ok(Self::resolve_guard(&current).unwrap_or(
                    ResolveOutcome::AlreadyResolved {
                        status: current.status,
                    },
                )),
                None => Ok(ResolveOutcome::NotFound),
            };
        }

        info!(
            approval_id = %id,
            session_id = %updated.session_id,
            status = %updated.status,
            approved_by,
            "approval resolved"
        );

        // Post-commit side effects: best-effort, never rolled back.
        if approved {
            self.sessions.signal_resumable(&updated.session_id);
        }
        self.events.emit(WebhookEvent::approval_resolved(&updated));

        Ok(ResolveOutcome::Resolved(updated))
    }

    /// Cancel an overdue pending request. Invoked by the expiry sweep, but
    /// safe to call from anywhere; a record already past `Pending` is a
    /// no-op, and one that isn't due yet is left untouched.
    pub async fn expire(&self, id: Uuid) -> anyhow::Result<ExpireOutcome> {
        let Some(record) = self.store.get(id).await? else {
            return Ok(ExpireOutcome::NotFound);
        };

        if record.is_terminal() {
            return Ok(ExpireOutcome::AlreadyTerminal {
                status: record.status,
            });
        }

        let now = Utc::now();
        if !record.is_expired(now) {
            return Ok(ExpireOutcome::NotYetDue);
        }

        let mut updated = record.clone();
        updated.status = ApprovalStatus::Cancelled;
        updated.cancellation_reason = Some(TIMEOUT_REASON.to_string());
        updated.updated_at = now;

        if !self
            .store
            .compare_and_set_status(id, ApprovalStatus::Pending, &updated)
            .await?
        {
            return match self.store.get(id).await? {
                Some(current) => Ok(ExpireOutcome::AlreadyTerminal {
                    status: current.status,
                }),
                None => Ok(ExpireOutcome::NotFound),
            };
        }

        info!(
            approval_id = %id,
            session_id = %updated.session_id,
            deadline = %updated.expires_at,
            "approval expired"
        );
        self.events.emit(WebhookEvent::approval_expired(&updated));

        Ok(ExpireOutcome::Expired(updated))
    }

    /// Administrative cancellation with an operator-supplied reason.
    /// Same terminal-state guard as `expire`, without the deadline condition.
    pub async fn cancel(&self, id: Uuid, reason: &str) -> anyhow::Result<CancelOutcome> {
        let Some(record) = self.store.get(id).await? else {
            return Ok(CancelOutcome::NotFound);
        };

        if record.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal {
                status: record.status,
            });
        }

        let mut updated = record.clone();
        updated.status = ApprovalStatus::Cancelled;
        updated.cancellation_reason = Some(reason.to_string());
        updated.updated_at = Utc::now();

        if !self
            .store
            .compare_and_set_status(id, ApprovalStatus::Pending, &updated)
            .await?
        {
            return match self.store.get(id).await? {
                Some(current) => Ok(CancelOutcome::AlreadyTerminal {
                    status: current.status,
                }),
                None => Ok(CancelOutcome::NotFound),
            };
        }

        info!(approval_id = %id, reason, "approval cancelled");
        self.events.emit(WebhookEvent::approval_cancelled(&updated));

        Ok(CancelOutcome::Cancelled(updated))
    }

    pub async fn get(&self, id: Uuid) -> anyhow::Result<Option<ApprovalRequest>> {
        self.store.get(id).await
    }

    pub async fn list_pending(&self) -> anyhow::Result<Vec<ApprovalRequest>> {
        self.store.list_pending().await
    }

    /// Map an already-terminal record to the outcome a resolver should see.
    /// `None` while the record is still pending.
    fn resolve_guard(record: &ApprovalRequest) -> Option<ResolveOutcome> {
        match record.status {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Cancelled => Some(ResolveOutcome::AlreadyCancelled {
                reason: record
                    .cancellation_reason
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string()),
            }),
            ApprovalStatus::Approved | ApprovalStatus::Rejected => {
                Some(ResolveOutcome::AlreadyResolved {
                    status: record.status.clone(),
                })
            }
        }
    }
}
