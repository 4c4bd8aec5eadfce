//! Monitor store: heartbeat/dead-man's-switch targets and their ping
//! history.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::id::new_id;
use crate::cron;
use crate::error::{CoreError, Result};
use crate::models::{Monitor, MonitorPing, MonitorStatus};

pub struct MonitorStore;

impl MonitorStore {
    pub async fn create(pool: &PgPool, mut monitor: Monitor) -> Result<Monitor> {
        if let Some(expr) = &monitor.cron_expression {
            cron::validate(expr)?;
            monitor.next_expected_at = Some(cron::next_after(expr, Utc::now())?);
        } else if let Some(interval) = monitor.interval_seconds {
            monitor.next_expected_at = Some(Utc::now() + chrono::Duration::seconds(interval));
        }

        let saved = sqlx::query_as::<_, Monitor>(
            r#"
            INSERT INTO monitors (
                id, organization_id, name, token, interval_seconds, cron_expression,
                grace_period_seconds, status, next_expected_at, enabled, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(monitor.id)
        .bind(monitor.organization_id)
        .bind(&monitor.name)
        .bind(&monitor.token)
        .bind(monitor.interval_seconds)
        .bind(&monitor.cron_expression)
        .bind(monitor.grace_period_seconds)
        .bind(monitor.status)
        .bind(monitor.next_expected_at)
        .bind(monitor.enabled)
        .fetch_one(pool)
        .await?;

        Ok(saved)
    }

    pub async fn find_by_token(pool: &PgPool, token: &str) -> Result<Monitor> {
        let monitor = sqlx::query_as::<_, Monitor>("SELECT * FROM monitors WHERE token = $1")
            .bind(token)
            .fetch_optional(pool)
            .await?
            .ok_or(CoreError::NotFound)?;
        Ok(monitor)
    }

    /// Lock a monitor row for the duration of a ping transaction so a
    /// concurrent overdue-sweep can't flip it to `down` mid-ping.
    pub async fn find_by_token_for_update(
        executor: &mut sqlx::PgConnection,
        token: &str,
    ) -> Result<Monitor> {
        let monitor = sqlx::query_as::<_, Monitor>("SELECT * FROM monitors WHERE token = $1 FOR UPDATE")
            .bind(token)
            .fetch_optional(&mut *executor)
            .await?
            .ok_or(CoreError::NotFound)?;
        Ok(monitor)
    }

    /// Every enabled, non-paused monitor past `next_expected_at + grace`,
    /// for the overdue sweep.
    pub async fn overdue(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<Monitor>> {
        let monitors = sqlx::query_as::<_, Monitor>(
            r#"
            SELECT * FROM monitors
            WHERE enabled
                AND status != 'down'
                AND status != 'paused'
                AND next_expected_at IS NOT NULL
                AND $1 > next_expected_at + (grace_period_seconds || ' seconds')::interval
            "#,
        )
        .bind(now)
        .fetch_all(pool)
        .await?;
        Ok(monitors)
    }

    pub async fn mark_down(pool: &PgPool, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE monitors SET status = 'down', updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record a ping and recompute `next_expected_at`, returning whether
    /// this ping represents a recovery from `down` (for the recovery
    /// notification).
    pub async fn record_ping(
        pool: &mut sqlx::PgConnection,
        monitor: &Monitor,
        received_at: DateTime<Utc>,
    ) -> Result<bool> {
        let was_down = monitor.status == MonitorStatus::Down;

        let next_expected = if let Some(expr) = &monitor.cron_expression {
            Some(cron::next_after(expr, received_at)?)
        } else {
            monitor
                .interval_seconds
                .map(|s| received_at + chrono::Duration::seconds(s))
        };

        sqlx::query(
            "INSERT INTO monitor_pings (id, monitor_id, expected_interval_seconds, received_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(new_id())
        .bind(monitor.id)
        .bind(monitor.interval_seconds)
        .bind(received_at)
        .execute(&mut *pool)
        .await?;

        sqlx::query(
            "UPDATE monitors SET status = 'up', last_ping_at = $1, next_expected_at = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(received_at)
        .bind(next_expected)
        .bind(monitor.id)
        .execute(&mut *pool)
        .await?;

        Ok(was_down)
    }

    pub async fn recent_pings(pool: &PgPool, monitor_id: Uuid, limit: i64) -> Result<Vec<MonitorPing>> {
        let pings = sqlx::query_as::<_, MonitorPing>(
            "SELECT * FROM monitor_pings WHERE monitor_id = $1 ORDER BY received_at DESC LIMIT $2",
        )
        .bind(monitor_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(pings)
    }

    /// Delete pings of this tenant's monitors past the retention cutoff.
    pub async fn purge_pings_before(pool: &PgPool, organization_id: Uuid, cutoff: DateTime<Utc>) -> Result<u64> {
        let rows = sqlx::query(
            r#"
            DELETE FROM monitor_pings
            WHERE received_at < $1
              AND monitor_id IN (SELECT id FROM monitors WHERE organization_id = $2)
            "#,
        )
        .bind(cutoff)
        .bind(organization_id)
        .execute(pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}
