//! Monitor checker: a leader-elected sweep that flips overdue
//! monitors to `down`, plus the ping-handling path invoked from the HTTP
//! layer's `/ping/:token` route.
//!
//! The overdue sweep uses the same advisory-lock leader election as the
//! scheduler (a distinct lock key, since the two must be free to elect
//! different leaders independently).

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::common::service::Service;
use crate::error::{CoreError, Result};
use crate::notifier::{NotificationBus, NotificationEvent};
use crate::store::MonitorStore;

const MONITOR_LOCK_KEY: i64 = 0x4D4F_4E49_544F_5200; // "MONITOR\0" as bytes

pub struct MonitorChecker {
    pool: PgPool,
    interval: Duration,
    notifications: NotificationBus,
}

impl MonitorChecker {
    pub fn new(pool: PgPool, interval: Duration, notifications: NotificationBus) -> Self {
        Self { pool, interval, notifications }
    }

    /// Run one overdue sweep. Returns without doing anything if another
    /// instance holds leadership this tick.
    pub async fn sweep(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(MONITOR_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await?;

        if !acquired {
            return Ok(());
        }

        let now = Utc::now();
        let overdue = MonitorStore::overdue(&self.pool, now).await?;

        for monitor in overdue {
            MonitorStore::mark_down(&self.pool, monitor.id).await?;
            warn!(monitor_id = %monitor.id, organization_id = %monitor.organization_id, "monitor marked down");
            self.notifications.publish(NotificationEvent::MonitorDown {
                organization_id: monitor.organization_id,
                monitor_id: monitor.id,
                occurred_at: now,
            });
        }

        tx.commit().await?;
        Ok(())
    }

    /// Handle a ping against `token`, recording it and flipping the
    /// monitor back to `up`. Locks the monitor row for the duration of the
    /// transaction so a concurrent overdue sweep can't race it to `down`.
    pub async fn handle_ping(&self, token: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let monitor = MonitorStore::find_by_token_for_update(&mut *tx, token).await?;
        if !monitor.enabled {
            return Err(CoreError::MonitorDisabled);
        }
        let received_at = Utc::now();
        let recovered = MonitorStore::record_ping(&mut *tx, &monitor, received_at).await?;

        tx.commit().await?;

        if recovered {
            info!(monitor_id = %monitor.id, "monitor recovered");
            self.notifications.publish(NotificationEvent::MonitorRecovered {
                organization_id: monitor.organization_id,
                monitor_id: monitor.id,
                occurred_at: received_at,
            });
        }

        Ok(recovered)
    }
}

#[async_trait::async_trait]
impl Service for MonitorChecker {
    fn name(&self) -> &'static str {
        "monitor-checker"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(interval_secs = self.interval.as_secs(), "monitor checker starting");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "monitor sweep failed");
                    }
                }
            }
        }
        info!("monitor checker stopped");
        Ok(())
    }
}
