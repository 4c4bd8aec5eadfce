//! Monitor — heartbeat/dead-man's-switch target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::id::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "monitor_status", rename_all = "snake_case")]
pub enum MonitorStatus {
    #[default]
    New,
    Up,
    Down,
    Paused,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Monitor {
    #[builder(default = new_id())]
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// Opaque public token used in the `/ping/<token>` path.
    #[builder(default = new_id().to_string())]
    pub token: String,

    #[builder(default, setter(strip_option))]
    pub interval_seconds: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub cron_expression: Option<String>,
    #[builder(default = 300)]
    pub grace_period_seconds: i64,

    #[builder(default)]
    pub status: MonitorStatus,
    #[builder(default, setter(strip_option))]
    pub last_ping_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub next_expected_at: Option<DateTime<Utc>>,
    #[builder(default = true)]
    pub enabled: bool,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Whether, as of `now`, this monitor should be considered down:
    /// enabled and past `next_expected_at + grace` with no intervening
    /// ping.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.next_expected_at {
            Some(expected) => {
                now > expected + chrono::Duration::seconds(self.grace_period_seconds)
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct MonitorPing {
    #[builder(default = new_id())]
    pub id: Uuid,
    pub monitor_id: Uuid,
    /// The interval that was in effect when this ping landed, captured
    /// for audit purposes.
    #[builder(default, setter(strip_option))]
    pub expected_interval_seconds: Option<i64>,
    #[builder(default = Utc::now())]
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(enabled: bool, next_expected: Option<DateTime<Utc>>, grace: i64) -> Monitor {
        Monitor::builder()
            .organization_id(Uuid::now_v7())
            .name("heartbeat".to_string())
            .enabled(enabled)
            .next_expected_at(next_expected)
            .grace_period_seconds(grace)
            .build()
    }

    #[test]
    fn disabled_monitor_never_overdue() {
        let now = Utc::now();
        let m = sample(false, Some(now - Duration::hours(1)), 30);
        assert!(!m.is_overdue(now));
    }

    #[test]
    fn overdue_past_grace() {
        let now = Utc::now();
        let m = sample(true, Some(now - Duration::seconds(100)), 30);
        assert!(m.is_overdue(now));
    }

    #[test]
    fn not_overdue_within_grace() {
        let now = Utc::now();
        let m = sample(true, Some(now - Duration::seconds(10)), 30);
        assert!(!m.is_overdue(now));
    }

    #[test]
    fn no_expectation_set_is_never_overdue() {
        let now = Utc::now();
        let m = sample(true, None, 30);
        assert!(!m.is_overdue(now));
    }
}
