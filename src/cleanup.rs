//! Cleanup sweeps: stale-execution recovery on a short interval, and
//! per-tenant retention purges on a long one.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::common::service::Service;
use crate::store::{EndpointStore, ExecutionStore, MonitorStore, OrganizationStore, TaskStore};

/// Advisory lock key for the retention sweep's leader election, distinct
/// from the scheduler's and monitor checker's.
const RETENTION_LOCK_KEY: i64 = 0x5245_5445_4E54_4E00; // "RETENTN\0" as bytes

/// Recovers executions abandoned by a crashed worker.
pub struct StaleExecutionSweep {
    pub pool: PgPool,
    pub threshold: Duration,
    pub interval: Duration,
}

#[async_trait::async_trait]
impl Service for StaleExecutionSweep {
    fn name(&self) -> &'static str {
        "stale-execution-sweep"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(interval_secs = self.interval.as_secs(), "stale execution sweep starting");
        let threshold = ChronoDuration::from_std(self.threshold).unwrap_or(ChronoDuration::minutes(5));
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match ExecutionStore::recover_stale(&self.pool, threshold).await {
                        Ok(0) => {}
                        Ok(n) => info!(recovered = n, "recovered stale executions"),
                        Err(e) => error!(error = %e, "stale execution sweep failed"),
                    }
                }
            }
        }
        info!("stale execution sweep stopped");
        Ok(())
    }
}

/// Daily, leader-elected retention purge: deletes executions,
/// soft-deleted tasks, inbound events, and monitor pings older than the
/// tenant's tier retention window; globally expires idempotency keys past
/// 24h and email/audit logs past their own window; resets monthly counters
/// on the 1st.
pub struct RetentionSweep {
    pub pool: PgPool,
    pub free_retention_days: i64,
    pub pro_retention_days: i64,
    pub global_log_retention_days: i64,
}

impl RetentionSweep {
    async fn run_once(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(RETENTION_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await?;

        if !acquired {
            return Ok(());
        }
        // Leadership only needs to be held long enough to decide to run;
        // the purge statements below run against the pool directly so one
        // slow tenant's delete doesn't hold the advisory lock's transaction
        // open for the whole sweep.
        tx.commit().await?;

        let organizations = sqlx::query_as::<_, crate::models::Organization>("SELECT * FROM organizations")
            .fetch_all(&self.pool)
            .await?;

        for org in organizations {
            let retention_days = org.retention_days(self.free_retention_days, self.pro_retention_days);
            let cutoff = Utc::now() - ChronoDuration::days(retention_days);

            let executions = ExecutionStore::purge_finished_before(&self.pool, org.id, cutoff).await?;
            let tasks = TaskStore::purge_deleted_before(&self.pool, org.id, cutoff).await?;
            let events = EndpointStore::purge_events_before(&self.pool, org.id, cutoff).await?;
            let pings = MonitorStore::purge_pings_before(&self.pool, org.id, cutoff).await?;

            if executions > 0 || tasks > 0 || events > 0 || pings > 0 {
                debug!(organization_id = %org.id, executions, tasks, events, pings, "retention sweep purged rows");
            }
        }

        let idempotency_cutoff = Utc::now() - ChronoDuration::hours(24);
        let expired_keys = OrganizationStore::expire_idempotency_keys_before(&self.pool, idempotency_cutoff).await?;

        let log_cutoff = Utc::now() - ChronoDuration::days(self.global_log_retention_days);
        let (emails, audits) = OrganizationStore::purge_logs_before(&self.pool, log_cutoff).await?;
        if expired_keys > 0 || emails > 0 || audits > 0 {
            debug!(expired_keys, emails, audits, "retention sweep purged global rows");
        }

        if Utc::now().format("%d").to_string() == "01" {
            let reset = OrganizationStore::reset_all_monthly_counts(&self.pool).await?;
            info!(organizations = reset, "monthly execution counters reset");
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Service for RetentionSweep {
    fn name(&self) -> &'static str {
        "retention-sweep"
    }

    /// Runs once per `interval` (nominally 24h) but only does work once
    /// past 03:00 UTC each day — a node that restarts mid-day waits for
    /// the next 03:00 crossing rather than re-running immediately.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!("retention sweep starting");
        let mut last_run_date = None;
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let today = now.date_naive();
                    if now.format("%H:%M").to_string() >= "03:00" && last_run_date != Some(today) {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "retention sweep failed");
                        }
                        last_run_date = Some(today);
                    }
                }
            }
        }
        info!("retention sweep stopped");
        Ok(())
    }
}
