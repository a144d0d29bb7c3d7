use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::store::ApprovalStore;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Lightweight connectivity probe for the readiness endpoint.
    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for PgStore {
    async fn insert(&self, record: &ApprovalRequest) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO approval_requests
               (id, session_id, agent_id, status, request_details,
                approved_by, approved_at, decision_notes, cancellation_reason,
                created_at, updated_at, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(record.id)
        .bind(&record.session_id)
        .bind(&record.agent_id)
        .bind(&record.status)
        .bind(&record.request_details)
        .bind(&record.approved_by)
        .bind(record.approved_at)
        .bind(&record.decision_notes)
        .bind(&record.cancellation_reason)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<ApprovalRequest>> {
        let row = sqlx::query_as::<_, ApprovalRequest>(
            "SELECT * FROM approval_requests WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        updated: &ApprovalRequest,
    ) -> anyhow::Result<bool> {
        // The status guard in the WHERE clause is the CAS: the row lock makes
        // Postgres re-check the predicate, so one of two concurrent writers
        // sees rows_affected = 0.
        let result = sqlx::query(
            r#"UPDATE approval_requests
               SET status = $1, approved_by = $2, approved_at = $3,
                   decision_notes = $4, cancellation_reason = $5, updated_at = $6
               WHERE id = $7 AND status = $8"#,
        )
        .bind(&updated.status)
        .bind(&updated.approved_by)
        .bind(updated.approved_at)
        .bind(&updated.decision_notes)
        .bind(&updated.cancellation_reason)
        .bind(updated.updated_at)
        .bind(id)
        .bind(&expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query_as::<_, ApprovalRequest>(
            r#"SELECT * FROM approval_requests
               WHERE status = 'pending' AND expires_at <= $1
               ORDER BY created_at ASC"#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_pending(&self) -> anyhow::Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query_as::<_, ApprovalRequest>(
            "SELECT * FROM approval_requests WHERE status = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
