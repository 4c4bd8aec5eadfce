//! Execution store: insert/claim/update rows representing a single
//! delivery attempt, enforcing the `pending -> running -> {success, failed,
//! timeout}` / `missed` status DAG.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::id::new_id;
use crate::error::{CoreError, Result};
use crate::models::{Execution, ExecutionStatus, Task};

pub struct ExecutionStore;

impl ExecutionStore {
    /// Insert a new row in `pending`, eligible for claim at `scheduled_for`.
    ///
    /// Generic over the executor so the scheduler can call this inside the
    /// same transaction that holds its leader-election advisory lock.
    pub async fn create_pending<'c, E>(
        executor: E,
        task: &Task,
        scheduled_for: DateTime<Utc>,
        attempt: i32,
    ) -> Result<Execution>
    where
        E: sqlx::PgExecutor<'c>,
    {
        let exec = sqlx::query_as::<_, Execution>(
            r#"
            INSERT INTO executions (id, task_id, organization_id, attempt, scheduled_for, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', NOW())
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(task.id)
        .bind(task.organization_id)
        .bind(attempt)
        .bind(scheduled_for)
        .fetch_one(executor)
        .await?;

        Ok(exec)
    }

    /// Insert a row directly in terminal `missed` status (catch-up skip).
    pub async fn create_missed<'c, E>(
        executor: E,
        task: &Task,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Execution>
    where
        E: sqlx::PgExecutor<'c>,
    {
        let exec = sqlx::query_as::<_, Execution>(
            r#"
            INSERT INTO executions (id, task_id, organization_id, attempt, scheduled_for, status, finished_at, created_at)
            VALUES ($1, $2, $3, 1, $4, 'missed', NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(task.id)
        .bind(task.organization_id)
        .bind(scheduled_for)
        .fetch_one(executor)
        .await?;

        Ok(exec)
    }

    /// Atomically claim the highest-priority due execution.
    ///
    /// Ordering: Pro tenants before Free, then ascending `interval_minutes`
    /// (NULLs — one-shot tasks — last), then ascending `scheduled_for`.
    /// `FOR UPDATE OF e SKIP LOCKED` ensures two workers never claim the
    /// same row.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<Execution>> {
        let exec = sqlx::query_as::<_, Execution>(
            r#"
            WITH claimed AS (
                SELECT e.id
                FROM executions e
                JOIN tasks t ON t.id = e.task_id
                JOIN organizations o ON o.id = e.organization_id
                WHERE e.status = 'pending' AND e.scheduled_for <= NOW()
                ORDER BY
                    (o.tier = 'pro') DESC,
                    t.interval_minutes ASC NULLS LAST,
                    e.scheduled_for ASC
                LIMIT 1
                FOR UPDATE OF e SKIP LOCKED
            )
            UPDATE executions e
            SET status = 'running', started_at = NOW()
            FROM claimed
            WHERE e.id = claimed.id
            RETURNING e.*
            "#,
        )
        .fetch_optional(pool)
        .await?;

        Ok(exec)
    }

    /// Transition a `running` execution to `success`.
    pub async fn complete(
        pool: &PgPool,
        id: Uuid,
        response_status: i32,
        response_body: Option<String>,
        duration_ms: i64,
    ) -> Result<()> {
        Self::terminal_transition(
            pool,
            id,
            ExecutionStatus::Success,
            Some(response_status),
            response_body,
            None,
            duration_ms,
        )
        .await
    }

    /// Transition a `running` execution to `failed`.
    pub async fn fail(
        pool: &PgPool,
        id: Uuid,
        response_status: Option<i32>,
        response_body: Option<String>,
        error_message: Option<String>,
        duration_ms: i64,
    ) -> Result<()> {
        Self::terminal_transition(
            pool,
            id,
            ExecutionStatus::Failed,
            response_status,
            response_body,
            error_message,
            duration_ms,
        )
        .await
    }

    /// Transition a `running` execution to `timeout`.
    pub async fn timeout(pool: &PgPool, id: Uuid, duration_ms: i64) -> Result<()> {
        Self::terminal_transition(
            pool,
            id,
            ExecutionStatus::Timeout,
            None,
            None,
            Some("request timed out".to_string()),
            duration_ms,
        )
        .await
    }

    async fn terminal_transition(
        pool: &PgPool,
        id: Uuid,
        status: ExecutionStatus,
        response_status: Option<i32>,
        response_body: Option<String>,
        error_message: Option<String>,
        duration_ms: i64,
    ) -> Result<()> {
        let rows = sqlx::query(
            r#"
            UPDATE executions
            SET status = $1,
                finished_at = NOW(),
                duration_ms = $2,
                response_status = $3,
                response_body = $4,
                error_message = $5
            WHERE id = $6 AND status = 'running'
            "#,
        )
        .bind(status)
        .bind(duration_ms)
        .bind(response_status)
        .bind(response_body)
        .bind(error_message)
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();

        if rows == 0 {
            // Not an error a worker should propagate: the row may
            // already have been reconciled by the stale sweep. Callers
            // that need to know can check `find_by_id` themselves.
            return Err(CoreError::Validation(format!(
                "execution {id} was not in `running` status; transition rejected"
            )));
        }

        Ok(())
    }

    /// Recover executions abandoned by a crashed worker: `running` rows
    /// whose `started_at` is older than `threshold` are marked `failed`
    /// with an "interrupted" message.
    pub async fn recover_stale(
        pool: &PgPool,
        threshold: chrono::Duration,
    ) -> Result<u64> {
        let cutoff = Utc::now() - threshold;
        let rows = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'failed',
                finished_at = NOW(),
                error_message = 'interrupted'
            WHERE status = 'running' AND started_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Execution> {
        let exec = sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(CoreError::NotFound)?;
        Ok(exec)
    }

    pub async fn count_pending(pool: &PgPool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM executions WHERE status = 'pending'")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    /// Most recent terminal execution for a task, used to detect a
    /// success -> failure status change for the failure notification.
    pub async fn last_terminal_for_task(pool: &PgPool, task_id: Uuid) -> Result<Option<Execution>> {
        let exec = sqlx::query_as::<_, Execution>(
            r#"
            SELECT * FROM executions
            WHERE task_id = $1 AND status IN ('success', 'failed', 'timeout')
            ORDER BY created_at DESC
            LIMIT 1 OFFSET 1
            "#,
        )
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
        Ok(exec)
    }

    /// Delete executions finished past the retention cutoff.
    pub async fn purge_finished_before(pool: &PgPool, organization_id: Uuid, cutoff: DateTime<Utc>) -> Result<u64> {
        let rows = sqlx::query(
            "DELETE FROM executions WHERE organization_id = $1 AND finished_at IS NOT NULL AND finished_at < $2",
        )
        .bind(organization_id)
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}
