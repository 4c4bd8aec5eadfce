//! Endpoint store: inbound webhook receivers and their forward URLs.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::id::new_id;
use crate::error::{CoreError, Result};
use crate::models::Endpoint;
use crate::urlguard;

pub struct EndpointStore;

impl EndpointStore {
    pub async fn create(pool: &PgPool, organization_id: Uuid, slug: &str, forward_urls: Vec<String>) -> Result<Endpoint> {
        for url in &forward_urls {
            urlguard::validate(url)?;
        }

        let endpoint = sqlx::query_as::<_, Endpoint>(
            r#"
            INSERT INTO endpoints (id, organization_id, slug, enabled, forward_urls, created_at, updated_at)
            VALUES ($1, $2, $3, true, $4, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(organization_id)
        .bind(slug)
        .bind(&forward_urls)
        .fetch_one(pool)
        .await?;

        Ok(endpoint)
    }

    pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Endpoint> {
        let endpoint = sqlx::query_as::<_, Endpoint>("SELECT * FROM endpoints WHERE slug = $1 AND enabled")
            .bind(slug)
            .fetch_optional(pool)
            .await?
            .ok_or(CoreError::NotFound)?;
        Ok(endpoint)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Endpoint> {
        let endpoint = sqlx::query_as::<_, Endpoint>("SELECT * FROM endpoints WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(CoreError::NotFound)?;
        Ok(endpoint)
    }

    pub async fn record_inbound(
        pool: &PgPool,
        endpoint: &Endpoint,
        method: &str,
        headers: serde_json::Value,
        body: Option<&str>,
        source_ip: Option<&str>,
    ) -> Result<crate::models::InboundEvent> {
        let event = sqlx::query_as::<_, crate::models::InboundEvent>(
            r#"
            INSERT INTO inbound_events (id, endpoint_id, organization_id, method, headers, body, source_ip, task_ids, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, '{}', NOW())
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(endpoint.id)
        .bind(endpoint.organization_id)
        .bind(method)
        .bind(headers)
        .bind(body)
        .bind(source_ip)
        .fetch_one(pool)
        .await?;

        Ok(event)
    }

    /// Record the fan-out result once every forward task has been created,
    /// never partially populated.
    pub async fn attach_task_ids(pool: &PgPool, event_id: Uuid, task_ids: &[Uuid]) -> Result<()> {
        sqlx::query("UPDATE inbound_events SET task_ids = $1 WHERE id = $2")
            .bind(task_ids)
            .bind(event_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn find_event_by_id(pool: &PgPool, id: Uuid) -> Result<crate::models::InboundEvent> {
        let event = sqlx::query_as::<_, crate::models::InboundEvent>("SELECT * FROM inbound_events WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(CoreError::NotFound)?;
        Ok(event)
    }

    /// Delete inbound events older than the retention cutoff.
    pub async fn purge_events_before(pool: &PgPool, organization_id: Uuid, cutoff: chrono::DateTime<Utc>) -> Result<u64> {
        let rows = sqlx::query("DELETE FROM inbound_events WHERE organization_id = $1 AND created_at < $2")
            .bind(organization_id)
            .bind(cutoff)
            .execute(pool)
            .await?
            .rows_affected();
        Ok(rows)
    }
}
