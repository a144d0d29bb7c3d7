use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::approval::{ApprovalRequest, ApprovalStatus};

pub mod memory;
pub mod postgres;

/// Record storage for approval requests.
///
/// `compare_and_set_status` is the one primitive the coordinator relies on
/// for race safety: the write applies only if the record's current status
/// still matches `expected`, so two concurrent writers targeting the same
/// record see exactly one `true`. Records are never deleted; terminal rows
/// are retained for audit.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert(&self, record: &ApprovalRequest) -> anyhow::Result<()>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<ApprovalRequest>>;

    /// Replace the record iff its current status matches `expected`.
    /// Returns `false` when the record is missing or the status moved on.
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        updated: &ApprovalRequest,
    ) -> anyhow::Result<bool>;

    /// Pending records whose deadline has passed, oldest first.
    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ApprovalRequest>>;

    async fn list_pending(&self) -> anyhow::Result<Vec<ApprovalRequest>>;
}
