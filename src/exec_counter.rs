//! Write-coalescing buffer for the per-organization monthly execution
//! counter.
//!
//! Every completed execution would otherwise mean an `UPDATE
//! organizations` row-write; under load that contends on the same row
//! across every worker touching that tenant. Workers instead bump an
//! in-process atomic counter and a background flush applies the
//! accumulated delta in one statement per tenant per interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::common::service::Service;
use crate::store::{OrganizationStore, TaskStore};

#[derive(Clone, Default)]
pub struct ExecCounter {
    counters: Arc<DashMap<Uuid, i64>>,
    timestamps: Arc<DashMap<Uuid, DateTime<Utc>>>,
}

impl ExecCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed execution for `organization_id`. Never touches
    /// the database directly.
    pub fn increment(&self, organization_id: Uuid) {
        *self.counters.entry(organization_id).or_insert(0) += 1;
    }

    /// Record a task's most recent execution time. Later calls overwrite
    /// earlier ones for the same task; never touches the database directly.
    pub fn record_last_execution(&self, task_id: Uuid, at: DateTime<Utc>) {
        self.timestamps.insert(task_id, at);
    }

    /// Drain the counter buffer and return the deltas accumulated since the
    /// last flush. Entries are removed so a crash between drain and flush
    /// only loses the in-flight batch, never double-applies it.
    fn drain_counters(&self) -> Vec<(Uuid, i64)> {
        let keys: Vec<Uuid> = self.counters.iter().map(|e| *e.key()).collect();
        keys.into_iter()
            .filter_map(|k| self.counters.remove(&k))
            .collect()
    }

    fn drain_timestamps(&self) -> Vec<(Uuid, DateTime<Utc>)> {
        let keys: Vec<Uuid> = self.timestamps.iter().map(|e| *e.key()).collect();
        keys.into_iter()
            .filter_map(|k| self.timestamps.remove(&k))
            .collect()
    }

    #[cfg(test)]
    fn pending_for(&self, organization_id: Uuid) -> i64 {
        self.counters.get(&organization_id).map(|v| *v).unwrap_or(0)
    }
}

/// Background service that periodically flushes the counter to Postgres.
pub struct ExecCounterFlusher {
    pub counter: ExecCounter,
    pub pool: PgPool,
    pub interval: Duration,
}

impl ExecCounterFlusher {
    async fn flush_once(&self) {
        for (organization_id, delta) in self.counter.drain_counters() {
            if delta == 0 {
                continue;
            }
            match OrganizationStore::apply_execution_delta(&self.pool, organization_id, delta).await {
                Ok(count) => debug!(%organization_id, delta, count, "flushed execution counter"),
                Err(e) => {
                    error!(%organization_id, delta, error = %e, "failed to flush execution counter, re-buffering");
                    *self.counter.counters.entry(organization_id).or_insert(0) += delta;
                }
            }
        }

        for (task_id, at) in self.counter.drain_timestamps() {
            if let Err(e) = TaskStore::set_last_execution_at(&self.pool, task_id, at).await {
                error!(%task_id, error = %e, "failed to flush last_execution_at, re-buffering");
                self.counter.timestamps.entry(task_id).or_insert(at);
            }
        }
    }
}

#[async_trait::async_trait]
impl Service for ExecCounterFlusher {
    fn name(&self) -> &'static str {
        "exec-counter-flusher"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(interval_secs = self.interval.as_secs(), "exec counter flusher starting");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.flush_once().await,
            }
        }
        // Final flush so a graceful shutdown doesn't drop the last interval's counts.
        self.flush_once().await;
        info!("exec counter flusher stopped");
        Ok(())
    }
}
