use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::store::ApprovalStore;

/// In-memory approval store backed by a `DashMap`.
///
/// Used by tests and by the `memory` store mode for local development.
/// The CAS holds the shard write guard for the duration of the check+swap,
/// which serializes writers per key while leaving other keys uncontended.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<Uuid, ApprovalRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }

    /// Number of records currently held (for diagnostics).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn insert(&self, record: &ApprovalRequest) -> anyhow::Result<()> {
        if self.records.contains_key(&record.id) {
            anyhow::bail!("approval {} already exists", record.id);
        }
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<ApprovalRequest>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        updated: &ApprovalRequest,
    ) -> anyhow::Result<bool> {
        match self.records.get_mut(&id) {
            Some(mut entry) if entry.status == expected => {
                *entry = updated.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ApprovalRequest>> {
        let mut due: Vec<ApprovalRequest> = self
            .records
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending && r.is_expired(now))
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|r| r.created_at);
        Ok(due)
    }

    async fn list_pending(&self) -> anyhow::Result<Vec<ApprovalRequest>> {
        let mut pending: Vec<ApprovalRequest> = self
            .records
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_record() -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            id: Uuid::new_v4(),
            session_id: "sess-1".into(),
            agent_id: "agent-1".into(),
            status: ApprovalStatus::Pending,
            request_details: serde_json::json!({"tool": "shell"}),
            approved_by: None,
            approved_at: None,
            decision_notes: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::minutes(30),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let store = MemoryStore::new();
        let rec = pending_record();
        store.insert(&rec).await.unwrap();

        let fetched = store.get(rec.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, rec.id);
        assert_eq!(fetched.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryStore::new();
        let rec = pending_record();
        store.insert(&rec).await.unwrap();
        assert!(store.insert(&rec).await.is_err());
    }

    #[tokio::test]
    async fn test_cas_succeeds_once_then_fails() {
        let store = MemoryStore::new();
        let rec = pending_record();
        store.insert(&rec).await.unwrap();

        let mut approved = rec.clone();
        approved.status = ApprovalStatus::Approved;
        assert!(store
            .compare_and_set_status(rec.id, ApprovalStatus::Pending, &approved)
            .await
            .unwrap());

        let mut rejected = rec.clone();
        rejected.status = ApprovalStatus::Rejected;
        assert!(!store
            .compare_and_set_status(rec.id, ApprovalStatus::Pending, &rejected)
            .await
            .unwrap());

        let current = store.get(rec.id).await.unwrap().unwrap();
        assert_eq!(current.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_cas_on_missing_record_returns_false() {
        let store = MemoryStore::new();
        let rec = pending_record();
        assert!(!store
            .compare_and_set_status(rec.id, ApprovalStatus::Pending, &rec)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_expired_pending_filters_live_and_terminal() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut overdue = pending_record();
        overdue.expires_at = now - chrono::Duration::minutes(1);
        store.insert(&overdue).await.unwrap();

        let live = pending_record();
        store.insert(&live).await.unwrap();

        let mut done = pending_record();
        done.status = ApprovalStatus::Approved;
        done.expires_at = now - chrono::Duration::minutes(5);
        store.insert(&done).await.unwrap();

        let due = store.list_expired_pending(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, overdue.id);
    }
}
