//! Scheduler tick end-to-end: upcoming fires, missed catch-up with grace,
//! no-backfill-past-creation, and quota-ceiling skipping.

mod common;

use std::time::Duration;

use common::fixtures;
use runlater_core::models::Tier;
use runlater_core::notifier::{NotificationBus, SchedulerWake, WorkerWake};
use runlater_core::scheduler::Scheduler;
use runlater_core::store::{OrganizationStore, TaskStore};
use sqlx::Row;
use test_context::test_context;

fn scheduler(pool: sqlx::PgPool) -> Scheduler {
    Scheduler::new(
        pool,
        Duration::from_secs(1),
        Duration::from_secs(30),
        SchedulerWake::new(),
        WorkerWake::new(),
        NotificationBus::new(16),
        1_000,
        100_000,
    )
}

async fn execution_statuses(pool: &sqlx::PgPool, task_id: uuid::Uuid) -> Vec<String> {
    sqlx::query("SELECT status::text FROM executions WHERE task_id = $1 ORDER BY scheduled_for ASC")
        .bind(task_id)
        .fetch_all(pool)
        .await
        .expect("query executions")
        .into_iter()
        .map(|row| row.get::<String, _>(0))
        .collect()
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn upcoming_cron_fire_is_materialized_once(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Pro).await;
    let task = fixtures::cron_task(&ctx.pool, &org, "* * * * *").await;
    let before = task.next_run_at.unwrap();

    let sched = scheduler(ctx.pool.clone());
    let led = sched.tick().await.expect("tick");
    assert!(led, "single scheduler instance should always win leadership");

    let statuses = execution_statuses(&ctx.pool, task.id).await;
    assert_eq!(statuses, vec!["pending".to_string()]);

    let reloaded = TaskStore::find_by_id(&ctx.pool, task.id).await.expect("find");
    assert!(reloaded.next_run_at.unwrap() > before, "fire-time must strictly advance across a tick");
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn missed_fires_land_as_missed_and_the_latest_within_grace_becomes_pending(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Pro).await;
    let task = fixtures::cron_task(&ctx.pool, &org, "*/5 * * * *").await;

    // Push next_run_at far enough into the past that several 5-minute
    // fires were missed, with the most recent still inside the grace
    // window computed from the task's interval.
    sqlx::query("UPDATE tasks SET next_run_at = NOW() - INTERVAL '16 minutes' WHERE id = $1")
        .bind(task.id)
        .execute(&ctx.pool)
        .await
        .expect("back-date next_run_at");

    let sched = scheduler(ctx.pool.clone());
    sched.tick().await.expect("tick");

    let statuses = execution_statuses(&ctx.pool, task.id).await;
    assert!(statuses.len() >= 2, "expected at least one missed fire plus the latest");
    let (earlier, last) = statuses.split_at(statuses.len() - 1);
    assert!(earlier.iter().all(|s| s == "missed"), "every catch-up fire but the last must be recorded as missed");
    assert_eq!(last[0], "pending");
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn fires_before_task_creation_are_never_backfilled(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Pro).await;
    let task = fixtures::cron_task(&ctx.pool, &org, "*/5 * * * *").await;

    // Simulate a task whose next_run_at predates its own creation by a wide
    // margin, as if the row had been sitting dormant for a long outage.
    sqlx::query("UPDATE tasks SET next_run_at = created_at - INTERVAL '2 hours' WHERE id = $1")
        .bind(task.id)
        .execute(&ctx.pool)
        .await
        .expect("back-date next_run_at before creation");

    let sched = scheduler(ctx.pool.clone());
    sched.tick().await.expect("tick");

    let bad: i64 = sqlx::query(
        "SELECT COUNT(*) FROM executions e JOIN tasks t ON t.id = e.task_id WHERE e.task_id = $1 AND e.scheduled_for < t.created_at",
    )
    .bind(task.id)
    .fetch_one(&ctx.pool)
    .await
    .expect("count backfilled rows")
    .get(0);
    assert_eq!(bad, 0, "no execution may be scheduled before the task's own creation");
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn over_quota_organization_advances_schedule_without_creating_an_execution(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    OrganizationStore::apply_execution_delta(&ctx.pool, org.id, 1_000).await.expect("exhaust quota");

    let task = fixtures::cron_task(&ctx.pool, &org, "* * * * *").await;
    let before = task.next_run_at.unwrap();

    let sched = scheduler(ctx.pool.clone());
    sched.tick().await.expect("tick");

    let statuses = execution_statuses(&ctx.pool, task.id).await;
    assert!(statuses.is_empty(), "an over-quota organization must get no execution rows");

    let reloaded = TaskStore::find_by_id(&ctx.pool, task.id).await.expect("find");
    assert!(reloaded.next_run_at.unwrap() > before, "the schedule must still advance even when the fire is dropped");
}
