//! Inbound fan-out: a hit against `/in/:slug` is recorded and fanned
//! out to one forwarding task per configured forward URL, all inside one
//! transaction so `task_ids` is never partially populated.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::id::new_id;
use crate::error::Result;
use crate::models::{Endpoint, InboundEvent, Task};
use crate::notifier::WorkerWake;

pub struct InboundReceiver {
    pool: PgPool,
    wake: WorkerWake,
}

impl InboundReceiver {
    pub fn new(pool: PgPool, wake: WorkerWake) -> Self {
        Self { pool, wake }
    }

    /// Record the inbound hit and fan it out, returning the stored event
    /// with `task_ids` populated.
    pub async fn receive(
        &self,
        endpoint: &Endpoint,
        method: &str,
        headers: serde_json::Value,
        body: Option<&str>,
        source_ip: Option<&str>,
    ) -> Result<InboundEvent> {
        let mut tx = self.pool.begin().await?;

        let event_id = new_id();
        let event = sqlx::query_as::<_, InboundEvent>(
            r#"
            INSERT INTO inbound_events (id, endpoint_id, organization_id, method, headers, body, source_ip, task_ids, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, '{}', NOW())
            RETURNING *
            "#,
        )
        .bind(event_id)
        .bind(endpoint.id)
        .bind(endpoint.organization_id)
        .bind(method)
        .bind(&headers)
        .bind(body)
        .bind(source_ip)
        .fetch_one(&mut *tx)
        .await?;

        let now = Utc::now();
        let mut task_ids = Vec::with_capacity(endpoint.forward_urls.len());

        for url in &endpoint.forward_urls {
            let filtered_headers = filtered_header_json(&headers);
            // `next_run_at` is left NULL (skip_next_run): the scheduler
            // never picks this task up, the execution inserted below is
            // its sole driver.
            let task = sqlx::query_as::<_, Task>(
                r#"
                INSERT INTO tasks (
                    id, organization_id, method, url, headers, body, timeout_ms, retry_attempts,
                    schedule_type, scheduled_at, next_run_at, enabled, queue_name, created_at, updated_at
                )
                VALUES ($1, $2, 'POST', $3, $4, $5, 30000, $6, 'once', $7, NULL, true, $8, NOW(), NOW())
                RETURNING *
                "#,
            )
            .bind(new_id())
            .bind(endpoint.organization_id)
            .bind(url)
            .bind(filtered_headers)
            .bind(body)
            .bind(endpoint.retry_attempts)
            .bind(now)
            .bind(&endpoint.queue_name)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO executions (id, task_id, organization_id, attempt, scheduled_for, status, created_at) VALUES ($1, $2, $3, 1, $4, 'pending', NOW())",
            )
            .bind(new_id())
            .bind(task.id)
            .bind(endpoint.organization_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            task_ids.push(task.id);
        }

        sqlx::query("UPDATE inbound_events SET task_ids = $1 WHERE id = $2")
            .bind(&task_ids)
            .bind(event_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.wake.notify();

        Ok(InboundEvent { task_ids, ..event })
    }

    /// Replay a previously recorded inbound event: re-fires its forward
    /// tasks as fresh one-shot executions. Errors with `TaskDeleted` if a
    /// forward task has since been hard-deleted rather than silently
    /// skipping it.
    pub async fn replay(&self, event: &InboundEvent) -> Result<Vec<Uuid>> {
        let mut new_execution_ids = Vec::with_capacity(event.task_ids.len());
        let now = Utc::now();

        for task_id in &event.task_ids {
            let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(crate::CoreError::TaskDeleted)?;

            let execution_id = new_id();
            sqlx::query(
                "INSERT INTO executions (id, task_id, organization_id, attempt, scheduled_for, status, created_at) VALUES ($1, $2, $3, 1, $4, 'pending', NOW())",
            )
            .bind(execution_id)
            .bind(task.id)
            .bind(task.organization_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

            new_execution_ids.push(execution_id);
        }

        self.wake.notify();
        Ok(new_execution_ids)
    }
}

fn filtered_header_json(headers: &serde_json::Value) -> serde_json::Value {
    let map = match headers.as_object() {
        Some(m) => m,
        None => return serde_json::json!({}),
    };
    let filtered: serde_json::Map<String, serde_json::Value> = map
        .iter()
        .filter(|(k, _)| !crate::models::endpoint::HOP_BY_HOP_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::Value::Object(filtered)
}
