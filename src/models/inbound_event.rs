//! InboundEvent — a recorded hit against an inbound endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::id::new_id;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct InboundEvent {
    #[builder(default = new_id())]
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub organization_id: Uuid,

    pub method: String,
    #[builder(default)]
    pub headers: serde_json::Value,
    #[builder(default, setter(strip_option))]
    pub body: Option<String>,
    #[builder(default, setter(strip_option))]
    pub source_ip: Option<String>,

    /// One task id per forward URL; empty until fan-out completes, never
    /// partially populated.
    #[builder(default)]
    pub task_ids: Vec<Uuid>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}
