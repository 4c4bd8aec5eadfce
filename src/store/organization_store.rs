//! Organization store: tenant CRUD and the monthly execution counter
//! flush target written by `exec_counter`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::id::new_id;
use crate::error::{CoreError, Result};
use crate::models::{Organization, Tier};

pub struct OrganizationStore;

impl OrganizationStore {
    pub async fn create(pool: &PgPool, name: &str, owner_user_id: Uuid, tier: Tier, webhook_secret: Vec<u8>) -> Result<Organization> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            INSERT INTO organizations (id, name, tier, webhook_secret, owner_user_id, monthly_execution_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 0, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(name)
        .bind(tier)
        .bind(webhook_secret)
        .bind(owner_user_id)
        .fetch_one(pool)
        .await?;

        Ok(org)
    }

    pub async fn find_by_id<'c, E>(executor: E, id: Uuid) -> Result<Organization>
    where
        E: sqlx::PgExecutor<'c>,
    {
        let org = sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await?
            .ok_or(CoreError::NotFound)?;
        Ok(org)
    }

    pub async fn set_notification_targets(
        pool: &PgPool,
        id: Uuid,
        email: Option<&str>,
        webhook_url: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE organizations SET notification_email = $1, notification_webhook_url = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(email)
        .bind(webhook_url)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Apply a coalesced execution-count delta (may be negative under
    /// correction, though the counter buffer never produces one in
    /// practice). Called once per flush interval, not per execution.
    pub async fn apply_execution_delta(pool: &PgPool, id: Uuid, delta: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "UPDATE organizations SET monthly_execution_count = monthly_execution_count + $1, updated_at = NOW() WHERE id = $2 RETURNING monthly_execution_count",
        )
        .bind(delta)
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// Reset all tenants' monthly counters, called by the monthly rollover
    /// sweep.
    pub async fn reset_all_monthly_counts(pool: &PgPool) -> Result<u64> {
        let rows = sqlx::query("UPDATE organizations SET monthly_execution_count = 0, updated_at = NOW()")
            .execute(pool)
            .await?
            .rows_affected();
        Ok(rows)
    }

    /// Global idempotency-key expiry, independent of tenant tier.
    pub async fn expire_idempotency_keys_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64> {
        let rows = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?
            .rows_affected();
        Ok(rows)
    }

    /// Global email/audit log retention, independent of tenant tier.
    pub async fn purge_logs_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
        let email_rows = sqlx::query("DELETE FROM email_logs WHERE sent_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?
            .rows_affected();
        let audit_rows = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?
            .rows_affected();
        Ok((email_rows, audit_rows))
    }
}
