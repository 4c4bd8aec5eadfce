//! Execution — one delivery attempt.
//!
//! Status transitions form a DAG: `pending -> running -> {success, failed,
//! timeout}`; `missed` is terminal and set directly without `running`.
//! Enforcing the DAG is the job of the execution store, not of this
//! struct — the struct only carries the shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::id::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "execution_status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Missed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

/// Response body cap before storage.
pub const RESPONSE_BODY_TRUNCATE_BYTES: usize = 10 * 1024;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Execution {
    #[builder(default = new_id())]
    pub id: Uuid,
    pub task_id: Uuid,
    pub organization_id: Uuid,
    #[builder(default = 1)]
    pub attempt: i32,

    pub scheduled_for: DateTime<Utc>,
    #[builder(default)]
    pub status: ExecutionStatus,

    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub duration_ms: Option<i64>,

    #[builder(default, setter(strip_option))]
    pub response_status: Option<i32>,
    #[builder(default, setter(strip_option))]
    pub response_body: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl Execution {
    /// Truncate `body` to the stored response-body cap.
    pub fn truncate_response_body(body: &str) -> String {
        if body.len() <= RESPONSE_BODY_TRUNCATE_BYTES {
            body.to_string()
        } else {
            // Truncate on a char boundary so we never split a multi-byte UTF-8 sequence.
            let mut end = RESPONSE_BODY_TRUNCATE_BYTES;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body[..end].to_string()
        }
    }
}
