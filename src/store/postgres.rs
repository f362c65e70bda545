//! Postgres-backed store. The source of truth in multi-process deployments.
//!
//! Atomicity comes from transactions: the request row and the matching
//! history entry commit together. The CAS guard is a plain
//! `WHERE status = 'pending'` on the UPDATE, so a racing transition loses at
//! the database even if two processes bypass the in-process lock manager.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::errors::ApprovalError;
use crate::models::{
    ApprovalFilter, ApprovalHistoryEntry, ApprovalRequest, ApprovalStatus, Decision,
    HistoryAction, Outcome,
};
use crate::store::{ApprovalStore, CasOutcome};

const REQUEST_COLUMNS: &str = "request_id, project, env, build, job, version, description, \
     action, timeout_seconds, status, created_at, updated_at, approver, approver_role, comment";

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

    async fn insert_history(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        request_id: &str,
        action: HistoryAction,
        decision: &Decision,
        timestamp: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        sqlx::query(
            r#"INSERT INTO approval_history (request_id, action, operator, operator_role, comment, "timestamp")
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(request_id)
        .bind(action)
        .bind(&decision.operator)
        .bind(&decision.operator_role)
        .bind(&decision.comment)
        .bind(timestamp)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for PgStore {
    async fn create(&self, request: &ApprovalRequest) -> Result<(), ApprovalError> {
        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            r#"INSERT INTO approvals
               (request_id, project, env, build, job, version, description, action,
                timeout_seconds, status, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(&request.request_id)
        .bind(&request.project)
        .bind(&request.env)
        .bind(&request.build)
        .bind(&request.job)
        .bind(&request.version)
        .bind(&request.description)
        .bind(&request.action)
        .bind(request.timeout_seconds)
        .bind(request.status)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            if let sqlx::Error::Database(ref db) = e {
                if db.is_unique_violation() {
                    return Err(ApprovalError::DuplicateRequest(request.request_id.clone()));
                }
            }
            return Err(e.into());
        }

        Self::insert_history(
            &mut tx,
            &request.request_id,
            HistoryAction::Created,
            &Decision::system("approval request created"),
            request.created_at,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        request_id: &str,
        expected: ApprovalStatus,
        outcome: Outcome,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, ApprovalError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, ApprovalRequest>(&format!(
            r#"UPDATE approvals
               SET status = $1, approver = $2, approver_role = $3, comment = $4, updated_at = $5
               WHERE request_id = $6 AND status = $7
               RETURNING {REQUEST_COLUMNS}"#,
        ))
        .bind(outcome.status())
        .bind(&decision.operator)
        .bind(&decision.operator_role)
        .bind(&decision.comment)
        .bind(now)
        .bind(request_id)
        .bind(expected)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            // Guard did not match: distinguish gone from already-terminal.
            let current = sqlx::query_as::<_, ApprovalRequest>(&format!(
                "SELECT {REQUEST_COLUMNS} FROM approvals WHERE request_id = $1",
            ))
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(match current {
                Some(request) => CasOutcome::Stale(request),
                None => CasOutcome::Missing,
            });
        };

        Self::insert_history(&mut tx, request_id, outcome.into(), decision, now).await?;
        tx.commit().await?;
        Ok(CasOutcome::Applied(updated))
    }

    async fn get(&self, request_id: &str) -> Result<Option<ApprovalRequest>, ApprovalError> {
        let row = sqlx::query_as::<_, ApprovalRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approvals WHERE request_id = $1",
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let rows = sqlx::query_as::<_, ApprovalRequest>(&format!(
            r#"SELECT {REQUEST_COLUMNS} FROM approvals
               WHERE ($1::varchar IS NULL OR project = $1)
                 AND ($2::varchar IS NULL OR env = $2)
                 AND ($3::varchar IS NULL OR status = $3)
               ORDER BY created_at DESC"#,
        ))
        .bind(&filter.project)
        .bind(&filter.env)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_history(
        &self,
        request_id: &str,
    ) -> Result<Vec<ApprovalHistoryEntry>, ApprovalError> {
        let rows = sqlx::query_as::<_, ApprovalHistoryEntry>(
            r#"SELECT id, request_id, action, operator, operator_role, comment, "timestamp"
               FROM approval_history
               WHERE request_id = $1
               ORDER BY "timestamp" ASC, id ASC"#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let rows = sqlx::query_as::<_, ApprovalRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approvals WHERE status = 'pending' ORDER BY created_at ASC",
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, request_id: &str) -> Result<bool, ApprovalError> {
        // approval_history rows go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM approvals WHERE request_id = $1")
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
