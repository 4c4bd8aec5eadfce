//! Leader-elected scheduler: turns due tasks into executions.
//!
//! Every `runlater` process runs a scheduler loop, but at most one
//! instance does work on a given tick — leadership is decided per tick via
//! `pg_try_advisory_xact_lock`, which is held for exactly the lifetime of
//! the transaction. No separate lease column or heartbeat bookkeeping is
//! needed since leadership never needs to outlive a single tick.
//!
//! For each due task: a cron task enumerates every fire missed since its
//! last `next_run_at` — all but the most recent become `missed`
//! executions, the most recent becomes `pending`; a one-shot task fires
//! exactly once and is then disabled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::common::service::Service;
use crate::models::{Organization, ScheduleType, Task};
use crate::notifier::{NotificationBus, NotificationEvent, SchedulerWake, WorkerWake};
use crate::store::{ExecutionStore, OrganizationStore, TaskStore};

/// Arbitrary but fixed advisory lock key for scheduler leadership. Chosen
/// as a recognizable constant rather than hashing a string at runtime.
const SCHEDULER_LOCK_KEY: i64 = 0x5343_4845_444C_5200; // "SCHEDLR\0" as bytes

/// Grace window bounds for the last catch-up fire of an overdue cron task:
/// 50% of the task's interval, clamped to this range.
const GRACE_WINDOW_MIN_SECS: i64 = 30;
const GRACE_WINDOW_MAX_SECS: i64 = 3600;

pub struct Scheduler {
    pool: PgPool,
    tick_interval: Duration,
    lookahead: Duration,
    wake: SchedulerWake,
    worker_wake: WorkerWake,
    notifications: NotificationBus,
    free_tier_monthly_quota: i64,
    pro_tier_monthly_quota: i64,
    /// Highest quota percentage (80 or 100) already notified for an org
    /// this month, so repeated over-quota ticks don't re-notify. Cleared
    /// once the org's usage drops back under 80%, which happens after the
    /// monthly rollover sweep resets the counter.
    quota_notified: Arc<DashMap<Uuid, u8>>,
}

impl Scheduler {
    pub fn new(
        pool: PgPool,
        tick_interval: Duration,
        lookahead: Duration,
        wake: SchedulerWake,
        worker_wake: WorkerWake,
        notifications: NotificationBus,
        free_tier_monthly_quota: i64,
        pro_tier_monthly_quota: i64,
    ) -> Self {
        Self {
            pool,
            tick_interval,
            lookahead,
            wake,
            worker_wake,
            notifications,
            free_tier_monthly_quota,
            pro_tier_monthly_quota,
            quota_notified: Arc::new(DashMap::new()),
        }
    }

    /// Publish quota-warning/quota-exceeded notifications the first time an
    /// org's usage crosses 80% or 100% this month.
    fn maybe_notify_quota(&self, org: &Organization) {
        let pct = org.quota_percent(self.free_tier_monthly_quota, self.pro_tier_monthly_quota);
        let last = self.quota_notified.get(&org.id).map(|v| *v).unwrap_or(0);

        match next_quota_threshold(pct, last) {
            ThresholdTransition::Clear => {
                self.quota_notified.remove(&org.id);
            }
            ThresholdTransition::Cross(threshold) => {
                let event = if threshold >= 100 {
                    NotificationEvent::QuotaExceeded {
                        organization_id: org.id,
                        monthly_execution_count: org.monthly_execution_count,
                        occurred_at: Utc::now(),
                    }
                } else {
                    NotificationEvent::QuotaWarning {
                        organization_id: org.id,
                        monthly_execution_count: org.monthly_execution_count,
                        occurred_at: Utc::now(),
                    }
                };
                self.notifications.publish(event);
                self.quota_notified.insert(org.id, threshold);
            }
            ThresholdTransition::None => {}
        }
    }

    /// Run one tick. Returns `Ok(false)` without doing anything if another
    /// instance holds leadership this tick.
    pub async fn tick(&self) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(SCHEDULER_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await?;

        if !acquired {
            return Ok(false);
        }

        let cutoff = Utc::now() + chrono::Duration::from_std(self.lookahead).unwrap_or_default();
        let due = TaskStore::due_before(&mut *tx, cutoff).await?;

        let mut created = 0usize;
        for task in &due {
            created += self.fire_task(&mut tx, task).await?;
        }

        tx.commit().await?;

        if created > 0 {
            debug!(tasks = due.len(), executions_created = created, "scheduler tick materialized executions");
            self.worker_wake.notify();
        }

        Ok(true)
    }

    /// Materialize every due fire of a single task within the scheduler's
    /// transaction, returning the number of `pending` executions created
    /// (0 or 1 — catch-up fires beyond the newest become `missed`, and an
    /// over-quota tenant gets no execution at all).
    async fn fire_task(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, task: &Task) -> anyhow::Result<usize> {
        let now = Utc::now();
        let org = OrganizationStore::find_by_id(&mut **tx, task.organization_id).await?;
        let over_quota = org.is_over_quota(self.free_tier_monthly_quota, self.pro_tier_monthly_quota);
        self.maybe_notify_quota(&org);

        match task.schedule_type {
            ScheduleType::Once => {
                let scheduled_at = task.next_run_at.unwrap_or(now);
                TaskStore::advance(&mut **tx, task, scheduled_at).await?;
                if over_quota {
                    debug!(task_id = %task.id, "dropping one-shot execution: organization over quota");
                    return Ok(0);
                }
                ExecutionStore::create_pending(&mut **tx, task, scheduled_at, 1).await?;
                Ok(1)
            }
            ScheduleType::Cron => {
                let expr = match &task.cron_expression {
                    Some(e) => e,
                    None => {
                        warn!(task_id = %task.id, "cron task missing cron_expression, skipping");
                        return Ok(0);
                    }
                };
                let next_run_at = task.next_run_at.unwrap_or(now);

                if next_run_at > now {
                    // Upcoming: due only because of scheduler lookahead, not
                    // backlog. A single fire, no catch-up enumeration.
                    TaskStore::advance(&mut **tx, task, next_run_at).await?;
                    if over_quota {
                        debug!(task_id = %task.id, "dropping upcoming execution: organization over quota");
                        return Ok(0);
                    }
                    ExecutionStore::create_pending(&mut **tx, task, next_run_at, 1).await?;
                    return Ok(1);
                }

                // Overdue: enumerate every fire missed since next_run_at,
                // but never backfill past the task's own creation.
                let fires: Vec<_> = crate::cron::fires_between(expr, next_run_at, now)?
                    .into_iter()
                    .filter(|t| *t >= task.created_at)
                    .collect();

                if fires.is_empty() {
                    TaskStore::advance(&mut **tx, task, now).await?;
                    return Ok(0);
                }

                // All but the last missed fire become `missed` executions
                // directly: running every backlog occurrence after an
                // outage would be surprising and wasteful.
                let (catch_up, latest) = fires.split_at(fires.len() - 1);
                for missed_at in catch_up {
                    ExecutionStore::create_missed(&mut **tx, task, *missed_at).await?;
                }
                if !catch_up.is_empty() {
                    info!(task_id = %task.id, missed = catch_up.len(), "recorded missed fires after catch-up");
                }

                let fire_at = latest[0];
                TaskStore::advance(&mut **tx, task, fire_at).await?;

                let interval_mins = task.interval_minutes.unwrap_or(60).max(1);
                let grace_secs = (interval_mins * 60 / 2).clamp(GRACE_WINDOW_MIN_SECS, GRACE_WINDOW_MAX_SECS);
                let within_grace = (now - fire_at) <= chrono::Duration::seconds(grace_secs);

                if within_grace && !over_quota {
                    ExecutionStore::create_pending(&mut **tx, task, fire_at, 1).await?;
                    Ok(1)
                } else {
                    ExecutionStore::create_missed(&mut **tx, task, fire_at).await?;
                    if over_quota {
                        debug!(task_id = %task.id, "last catch-up fire marked missed: organization over quota");
                    } else {
                        debug!(task_id = %task.id, grace_secs, "last catch-up fire marked missed: outside grace window");
                    }
                    Ok(0)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThresholdTransition {
    /// Usage dropped back below 80%: forget any threshold already notified.
    Clear,
    /// Usage just crossed this threshold (80 or 100) for the first time.
    Cross(u8),
    /// No change in notification state.
    None,
}

/// Decide what, if anything, to do about quota notification state given the
/// org's current usage percentage and the highest threshold (0, 80, or 100)
/// already notified this month.
fn next_quota_threshold(pct: u8, last: u8) -> ThresholdTransition {
    if pct < 80 {
        if last > 0 {
            ThresholdTransition::Clear
        } else {
            ThresholdTransition::None
        }
    } else if pct >= 100 && last < 100 {
        ThresholdTransition::Cross(100)
    } else if pct >= 80 && last < 80 {
        ThresholdTransition::Cross(80)
    } else {
        ThresholdTransition::None
    }
}

#[async_trait::async_trait]
impl Service for Scheduler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(
            tick_secs = self.tick_interval.as_secs(),
            lookahead_secs = self.lookahead.as_secs(),
            "scheduler starting"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "scheduler tick failed");
            }
        }

        info!("scheduler stopped");
        Ok(())
    }
}
