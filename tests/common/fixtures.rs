use chrono::{DateTime, Utc};
use runlater_core::models::{Monitor, Organization, Task, Tier};
use runlater_core::store::{MonitorStore, OrganizationStore, TaskStore};
use sqlx::PgPool;

pub async fn org(pool: &PgPool, tier: Tier) -> Organization {
    OrganizationStore::create(pool, "acme", uuid::Uuid::now_v7(), tier, b"secret".to_vec())
        .await
        .expect("create organization")
}

pub async fn once_task(pool: &PgPool, org: &Organization, scheduled_at: DateTime<Utc>) -> Task {
    let draft = Task::builder()
        .organization_id(org.id)
        .url("https://example.com/hook".to_string())
        .schedule_type(runlater_core::models::ScheduleType::Once)
        .scheduled_at(scheduled_at)
        .retry_attempts(3)
        .build();
    TaskStore::create(pool, org, draft).await.expect("create task")
}

pub async fn cron_task(pool: &PgPool, org: &Organization, expr: &str) -> Task {
    let draft = Task::builder()
        .organization_id(org.id)
        .url("https://example.com/hook".to_string())
        .schedule_type(runlater_core::models::ScheduleType::Cron)
        .cron_expression(expr.to_string())
        .build();
    TaskStore::create(pool, org, draft).await.expect("create task")
}

pub async fn interval_monitor(pool: &PgPool, org: &Organization, interval_seconds: i64, grace_period_seconds: i64) -> Monitor {
    let draft = Monitor::builder()
        .organization_id(org.id)
        .name("heartbeat".to_string())
        .interval_seconds(interval_seconds)
        .grace_period_seconds(grace_period_seconds)
        .build();
    MonitorStore::create(pool, draft).await.expect("create monitor")
}
