//! Task store: create/update/delete, enforcing URL safety, cron
//! validity, and the Free-tier minimum interval floor at the write boundary
//! rather than scattering validation across callers.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::id::new_id;
use crate::cron;
use crate::error::{CoreError, Result};
use crate::models::{Organization, ScheduleType, Task, Tier};
use crate::urlguard;

/// Minimum cron interval, in minutes, enforced for Free-tier tasks.
pub const FREE_TIER_MIN_INTERVAL_MINUTES: i64 = 60;

pub struct TaskStore;

impl TaskStore {
    /// Validate and persist a new task. `task.id`/`created_at`/`updated_at`
    /// are expected to already carry builder defaults; `next_run_at` is
    /// computed here from the schedule so callers never hand-roll it.
    pub async fn create(pool: &PgPool, org: &Organization, mut task: Task) -> Result<Task> {
        urlguard::validate(&task.url)?;
        if let Some(callback) = &task.callback_url {
            urlguard::validate(callback)?;
        }

        match task.schedule_type {
            ScheduleType::Cron => {
                let expr = task
                    .cron_expression
                    .as_deref()
                    .ok_or_else(|| CoreError::Validation("cron task requires cron_expression".into()))?;
                cron::validate(expr)?;

                let interval = cron::interval_minutes(expr)?;
                if org.tier == Tier::Free && interval < FREE_TIER_MIN_INTERVAL_MINUTES {
                    return Err(CoreError::Validation(format!(
                        "free tier tasks must run at least every {FREE_TIER_MIN_INTERVAL_MINUTES} minutes"
                    )));
                }
                task.interval_minutes = Some(interval);
                task.next_run_at = Some(cron::next_after(expr, Utc::now())?);
            }
            ScheduleType::Once => {
                let at = task
                    .scheduled_at
                    .ok_or_else(|| CoreError::Validation("one-shot task requires scheduled_at".into()))?;
                task.next_run_at = Some(at);
            }
        }

        let saved = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (
                id, organization_id, method, url, headers, body, timeout_ms, retry_attempts,
                schedule_type, cron_expression, interval_minutes, scheduled_at, next_run_at,
                enabled, queue_name, callback_url, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(task.id)
        .bind(task.organization_id)
        .bind(&task.method)
        .bind(&task.url)
        .bind(&task.headers)
        .bind(&task.body)
        .bind(task.timeout_ms)
        .bind(task.retry_attempts)
        .bind(task.schedule_type)
        .bind(&task.cron_expression)
        .bind(task.interval_minutes)
        .bind(task.scheduled_at)
        .bind(task.next_run_at)
        .bind(task.enabled)
        .bind(&task.queue_name)
        .bind(&task.callback_url)
        .fetch_one(pool)
        .await?;

        Ok(saved)
    }

    /// Re-validate and persist an edit to an existing task. `next_run_at`
    /// is only recomputed when this update flips the task from disabled to
    /// enabled — re-enabling fires from the current time rather than
    /// replaying whatever was missed while disabled, and a field-only edit
    /// to an already-enabled task leaves its schedule untouched.
    pub async fn update(pool: &PgPool, org: &Organization, existing: &Task, mut updated: Task) -> Result<Task> {
        urlguard::validate(&updated.url)?;
        if let Some(callback) = &updated.callback_url {
            urlguard::validate(callback)?;
        }

        let reactivating = !existing.enabled && updated.enabled;
        updated.next_run_at = existing.next_run_at;

        match updated.schedule_type {
            ScheduleType::Cron => {
                let expr = updated
                    .cron_expression
                    .as_deref()
                    .ok_or_else(|| CoreError::Validation("cron task requires cron_expression".into()))?;
                cron::validate(expr)?;

                let interval = cron::interval_minutes(expr)?;
                if org.tier == Tier::Free && interval < FREE_TIER_MIN_INTERVAL_MINUTES {
                    return Err(CoreError::Validation(format!(
                        "free tier tasks must run at least every {FREE_TIER_MIN_INTERVAL_MINUTES} minutes"
                    )));
                }
                updated.interval_minutes = Some(interval);
                if reactivating {
                    updated.next_run_at = Some(cron::next_after(expr, Utc::now())?);
                }
            }
            ScheduleType::Once => {
                let at = updated
                    .scheduled_at
                    .ok_or_else(|| CoreError::Validation("one-shot task requires scheduled_at".into()))?;
                if reactivating {
                    updated.next_run_at = Some(at.max(Utc::now()));
                }
            }
        }

        let saved = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks SET
                method = $1, url = $2, headers = $3, body = $4, timeout_ms = $5, retry_attempts = $6,
                schedule_type = $7, cron_expression = $8, interval_minutes = $9, scheduled_at = $10,
                next_run_at = $11, enabled = $12, queue_name = $13, callback_url = $14, updated_at = NOW()
            WHERE id = $15 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(&updated.method)
        .bind(&updated.url)
        .bind(&updated.headers)
        .bind(&updated.body)
        .bind(updated.timeout_ms)
        .bind(updated.retry_attempts)
        .bind(updated.schedule_type)
        .bind(&updated.cron_expression)
        .bind(updated.interval_minutes)
        .bind(updated.scheduled_at)
        .bind(updated.next_run_at)
        .bind(updated.enabled)
        .bind(&updated.queue_name)
        .bind(&updated.callback_url)
        .bind(existing.id)
        .fetch_optional(pool)
        .await?
        .ok_or(CoreError::NotFound)?;

        Ok(saved)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(CoreError::NotFound)?;
        Ok(task)
    }

    /// Tasks due at or before `cutoff`, for the scheduler's lookahead query.
    /// Soft-deleted and disabled tasks are excluded.
    ///
    /// `FOR UPDATE SKIP LOCKED` lets two scheduler instances race this
    /// query harmlessly even outside the advisory-lock window: whichever
    /// wins the row proceeds, the other simply sees one fewer candidate.
    pub async fn due_before<'c, E>(executor: E, cutoff: DateTime<Utc>) -> Result<Vec<Task>>
    where
        E: sqlx::PgExecutor<'c>,
    {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE enabled AND deleted_at IS NULL AND next_run_at <= $1
            ORDER BY next_run_at ASC
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(cutoff)
        .fetch_all(executor)
        .await?;
        Ok(tasks)
    }

    /// Advance a recurring task's `next_run_at` past `fired_at`, or soft
    /// disable a one-shot task once it has fired. Called by the
    /// scheduler only — `last_execution_at` reflects actual completion
    /// time and is maintained separately by the exec counter's
    /// write-coalesced flush.
    pub async fn advance<'c, E>(executor: E, task: &Task, fired_at: DateTime<Utc>) -> Result<()>
    where
        E: sqlx::PgExecutor<'c>,
    {
        match task.schedule_type {
            ScheduleType::Cron => {
                let expr = task
                    .cron_expression
                    .as_deref()
                    .ok_or_else(|| CoreError::Validation("cron task missing cron_expression".into()))?;
                let next = cron::next_after(expr, fired_at)?;
                sqlx::query("UPDATE tasks SET next_run_at = $1, updated_at = NOW() WHERE id = $2")
                    .bind(next)
                    .bind(task.id)
                    .execute(executor)
                    .await?;
            }
            ScheduleType::Once => {
                sqlx::query("UPDATE tasks SET enabled = false, updated_at = NOW() WHERE id = $1")
                    .bind(task.id)
                    .execute(executor)
                    .await?;
            }
        }
        Ok(())
    }

    /// Apply a coalesced `last_execution_at` update. Called only by the
    /// exec counter's periodic flush, never per-execution.
    pub async fn set_last_execution_at(pool: &PgPool, task_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE tasks SET last_execution_at = $1 WHERE id = $2")
            .bind(at)
            .bind(task_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Soft-delete: the row survives for audit/retention purposes, but is
    /// no longer scheduled and any subsequent delivery attempt returns
    /// `TaskDeleted` rather than silently dispatching.
    pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE tasks SET enabled = false, deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(CoreError::NotFound);
        }
        Ok(())
    }

    /// Copy a task's request/schedule fields under a new id. A `once`
    /// task whose `scheduled_at` has already elapsed is pushed out to an
    /// hour from now rather than cloned with a schedule that would fire
    /// immediately.
    pub async fn clone(pool: &PgPool, source: &Task) -> Result<Task> {
        let now = Utc::now();

        let (scheduled_at, next_run_at) = match source.schedule_type {
            ScheduleType::Once => {
                let at = source.scheduled_at.unwrap_or(now);
                let at = if at <= now { now + chrono::Duration::hours(1) } else { at };
                (Some(at), Some(at))
            }
            ScheduleType::Cron => {
                let expr = source
                    .cron_expression
                    .as_deref()
                    .ok_or_else(|| CoreError::Validation("cron task missing cron_expression".into()))?;
                (None, Some(cron::next_after(expr, now)?))
            }
        };

        let cloned = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (
                id, organization_id, method, url, headers, body, timeout_ms, retry_attempts,
                schedule_type, cron_expression, interval_minutes, scheduled_at, next_run_at,
                enabled, queue_name, callback_url, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, true, $14, $15, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(source.organization_id)
        .bind(&source.method)
        .bind(&source.url)
        .bind(&source.headers)
        .bind(&source.body)
        .bind(source.timeout_ms)
        .bind(source.retry_attempts)
        .bind(source.schedule_type)
        .bind(&source.cron_expression)
        .bind(source.interval_minutes)
        .bind(scheduled_at)
        .bind(next_run_at)
        .bind(&source.queue_name)
        .bind(&source.callback_url)
        .fetch_one(pool)
        .await?;

        Ok(cloned)
    }

    /// Create an independent copy of `source` under a new id, used by
    /// inbound fan-out to materialize one task per forward URL.
    pub async fn clone_for_forward(
        pool: &PgPool,
        source: &Task,
        url: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Task> {
        let clone = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (
                id, organization_id, method, url, headers, body, timeout_ms, retry_attempts,
                schedule_type, scheduled_at, next_run_at, enabled, queue_name, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'once', $9, $9, true, $10, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(source.organization_id)
        .bind(&source.method)
        .bind(url)
        .bind(&source.headers)
        .bind(&source.body)
        .bind(source.timeout_ms)
        .bind(source.retry_attempts)
        .bind(scheduled_at)
        .bind(&source.queue_name)
        .fetch_one(pool)
        .await?;

        Ok(clone)
    }

    /// Delete tasks soft-deleted past the retention cutoff.
    pub async fn purge_deleted_before(pool: &PgPool, organization_id: Uuid, cutoff: DateTime<Utc>) -> Result<u64> {
        let rows = sqlx::query(
            "DELETE FROM tasks WHERE organization_id = $1 AND deleted_at IS NOT NULL AND deleted_at < $2",
        )
        .bind(organization_id)
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}
