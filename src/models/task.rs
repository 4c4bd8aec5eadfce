//! Task — a deliverable specification (HTTP request + schedule).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::id::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "task_schedule_type", rename_all = "snake_case")]
pub enum ScheduleType {
    #[default]
    Cron,
    Once,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Task {
    #[builder(default = new_id())]
    pub id: Uuid,
    pub organization_id: Uuid,

    #[builder(default = "POST".to_string())]
    pub method: String,
    pub url: String,
    #[builder(default, setter(strip_option))]
    pub headers: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub body: Option<String>,
    #[builder(default = 30_000)]
    pub timeout_ms: i64,
    #[builder(default = 3)]
    pub retry_attempts: i32,

    #[builder(default)]
    pub schedule_type: ScheduleType,
    #[builder(default, setter(strip_option))]
    pub cron_expression: Option<String>,
    #[builder(default, setter(strip_option))]
    pub interval_minutes: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub scheduled_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default, setter(strip_option))]
    pub queue_name: Option<String>,
    #[builder(default, setter(strip_option))]
    pub callback_url: Option<String>,
    #[builder(default, setter(strip_option))]
    pub last_execution_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub deleted_at: Option<DateTime<Utc>>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// The host component of `url`, used as the host-blocker key.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Headers filtered down to what's forwarded, applied on top of the
    /// hop-by-hop strip already done at fan-out time; returned as an
    /// owned map for request building.
    pub fn header_map(&self) -> HashMap<String, String> {
        match &self.headers {
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            _ => HashMap::new(),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.schedule_type == ScheduleType::Cron
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Task {
        Task::builder()
            .organization_id(Uuid::now_v7())
            .url("https://api.example.com/hook".to_string())
            .build()
    }

    #[test]
    fn default_method_is_post() {
        assert_eq!(sample().method, "POST");
    }

    #[test]
    fn default_retry_attempts_is_three() {
        assert_eq!(sample().retry_attempts, 3);
    }

    #[test]
    fn host_extracts_from_url() {
        assert_eq!(sample().host().as_deref(), Some("api.example.com"));
    }

    #[test]
    fn cron_task_is_recurring() {
        assert!(sample().is_recurring());
    }

    #[test]
    fn once_task_is_not_recurring() {
        let mut t = sample();
        t.schedule_type = ScheduleType::Once;
        assert!(!t.is_recurring());
    }
}
