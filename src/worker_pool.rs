//! Worker pool: maintains between `min` and `max` live workers,
//! scaled to the depth of the pending-execution queue.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::common::service::Service;
use crate::exec_counter::ExecCounter;
use crate::host_blocker::HostBlocker;
use crate::notifier::{NotificationBus, WorkerWake};
use crate::store::ExecutionStore;
use crate::worker::Worker;

pub struct WorkerPoolConfig {
    pub min: usize,
    pub max: usize,
    pub rescan_interval: Duration,
}

pub struct WorkerPool {
    pool: PgPool,
    config: WorkerPoolConfig,
    host_blocker: HostBlocker,
    exec_counter: ExecCounter,
    notifications: NotificationBus,
    wake: WorkerWake,
}

impl WorkerPool {
    pub fn new(
        pool: PgPool,
        config: WorkerPoolConfig,
        host_blocker: HostBlocker,
        exec_counter: ExecCounter,
        notifications: NotificationBus,
        wake: WorkerWake,
    ) -> Self {
        Self {
            pool,
            config,
            host_blocker,
            exec_counter,
            notifications,
            wake,
        }
    }

    /// Target worker count for the current queue depth: clamp(pending,
    /// min, max). A shallow queue still gets `min` workers so latency
    /// stays low even when load is light.
    fn target_count(&self, pending: i64) -> usize {
        target_count(pending, self.config.min, self.config.max)
    }

    fn spawn_worker(&self, index: usize, shutdown: CancellationToken) -> JoinHandle<()> {
        let worker = Box::new(Worker::new(
            format!("worker-{index}"),
            self.pool.clone(),
            self.host_blocker.clone(),
            self.exec_counter.clone(),
            self.notifications.clone(),
            self.wake.clone(),
        ));

        tokio::spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                warn!(error = %e, "worker exited with error");
            }
        })
    }
}

#[async_trait::async_trait]
impl Service for WorkerPool {
    fn name(&self) -> &'static str {
        "worker-pool"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(min = self.config.min, max = self.config.max, "worker pool starting");

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for i in 0..self.config.min {
            handles.push(self.spawn_worker(i, shutdown.child_token()));
        }

        let mut ticker = tokio::time::interval(self.config.rescan_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            handles.retain(|h| !h.is_finished());

            let pending = ExecutionStore::count_pending(&self.pool).await.unwrap_or(0);
            let target = self.target_count(pending);

            if handles.len() < target {
                let added = target - handles.len();
                info!(pending, current = handles.len(), target, "scaling worker pool up");
                for _ in 0..added {
                    let idx = handles.len();
                    handles.push(self.spawn_worker(idx, shutdown.child_token()));
                }
            }
            // Scaling down happens passively: a worker idle past its own
            // exit threshold (or cancelled by `shutdown`) just returns from
            // `run`, and `handles.retain` above drops it next rescan. We
            // don't preemptively kill live workers mid-delivery to shrink
            // the pool, since an in-flight HTTP call shouldn't be
            // interrupted just to save a task slot.
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("worker pool stopped");
        Ok(())
    }
}

/// Clamp the desired worker count to `[min, max]`. Standalone so it's
/// testable without standing up a real pool.
fn target_count(pending: i64, min: usize, max: usize) -> usize {
    (pending.max(0) as usize).clamp(min, max)
}
