//! Pub/sub wake signals and outbound notification events.
//!
//! Two distinct jobs live here, both "tell someone something changed":
//! - Wake signals are an in-process latency optimization: instead of every
//!   background loop polling on a short fixed tick, a writer can nudge the
//!   relevant loop to look sooner. Nothing depends on a wake actually being
//!   received — every loop still polls on its own tick as the correctness
//!   backstop.
//! - Notification events (a task's run crossed success->failure, a monitor
//!   flipped down/up, a tenant crossed its quota) are queued here and
//!   drained by the email/webhook delivery path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

/// Fired whenever the scheduler should consider re-evaluating due tasks
/// sooner than its next tick — e.g. a task was just created with
/// `scheduled_at` in the near future.
#[derive(Clone, Default)]
pub struct SchedulerWake(Arc<Notify>);

impl SchedulerWake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.0.notify_one();
    }

    pub async fn notified(&self) {
        self.0.notified().await;
    }
}

/// Fired whenever a new execution is claimable, so idle workers in the
/// pool's backoff sleep can wake immediately rather than waiting out the
/// rest of their poll interval.
#[derive(Clone, Default)]
pub struct WorkerWake(Arc<Notify>);

impl WorkerWake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.0.notify_waiters();
    }

    pub async fn notified(&self) {
        self.0.notified().await;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    TaskFailing {
        organization_id: Uuid,
        task_id: Uuid,
        execution_id: Uuid,
        error_message: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    MonitorDown {
        organization_id: Uuid,
        monitor_id: Uuid,
        occurred_at: DateTime<Utc>,
    },
    MonitorRecovered {
        organization_id: Uuid,
        monitor_id: Uuid,
        occurred_at: DateTime<Utc>,
    },
    /// Monthly quota crossed 80% consumed.
    QuotaWarning {
        organization_id: Uuid,
        monthly_execution_count: i64,
        occurred_at: DateTime<Utc>,
    },
    /// Monthly quota crossed 100% consumed; further executions are skipped
    /// rather than attempted.
    QuotaExceeded {
        organization_id: Uuid,
        monthly_execution_count: i64,
        occurred_at: DateTime<Utc>,
    },
}

impl NotificationEvent {
    pub fn organization_id(&self) -> Uuid {
        match self {
            NotificationEvent::TaskFailing { organization_id, .. }
            | NotificationEvent::MonitorDown { organization_id, .. }
            | NotificationEvent::MonitorRecovered { organization_id, .. }
            | NotificationEvent::QuotaWarning { organization_id, .. }
            | NotificationEvent::QuotaExceeded { organization_id, .. } => *organization_id,
        }
    }
}

/// Broadcast channel of notification events; the delivery path (email and
/// webhook senders) subscribes once at startup. Lagging subscribers drop
/// the oldest events rather than block producers — notifications are
/// best-effort, never a correctness dependency.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<NotificationEvent>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: NotificationEvent) {
        // No subscribers is a normal state (e.g. in tests); ignore the error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scheduler_wake_delivers_to_waiter() {
        let wake = SchedulerWake::new();
        let waiter = wake.clone();
        let handle = tokio::spawn(async move {
            waiter.notified().await;
        });
        tokio::task::yield_now().await;
        wake.notify();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn notification_bus_delivers_published_event() {
        let bus = NotificationBus::new(16);
        let mut rx = bus.subscribe();
        let org_id = Uuid::now_v7();
        bus.publish(NotificationEvent::MonitorDown {
            organization_id: org_id,
            monitor_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.organization_id(), org_id);
    }
}
