//! Task creation/advance invariants: free-tier interval floor, strictly
//! increasing `next_run_at`, and no backfill past task creation.

mod common;

use chrono::Utc;
use common::fixtures;
use runlater_core::models::{ScheduleType, Task, Tier};
use runlater_core::store::TaskStore;
use test_context::test_context;

#[test_context(common::TestHarness)]
#[tokio::test]
async fn free_tier_rejects_sub_hourly_cron(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let draft = Task::builder()
        .organization_id(org.id)
        .url("https://example.com/hook".to_string())
        .schedule_type(ScheduleType::Cron)
        .cron_expression("*/5 * * * *".to_string())
        .build();

    let result = TaskStore::create(&ctx.pool, &org, draft).await;
    assert!(result.is_err(), "a 5-minute cron must be rejected for free tier");
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn pro_tier_allows_minute_level_cron(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Pro).await;
    let task = fixtures::cron_task(&ctx.pool, &org, "* * * * *").await;
    assert_eq!(task.interval_minutes, Some(1));
    assert!(task.next_run_at.is_some());
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn advance_moves_cron_next_run_at_strictly_forward(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Pro).await;
    let task = fixtures::cron_task(&ctx.pool, &org, "* * * * *").await;
    let before = task.next_run_at.unwrap();

    TaskStore::advance(&ctx.pool, &task, before).await.expect("advance");
    let reloaded = TaskStore::find_by_id(&ctx.pool, task.id).await.expect("find");

    assert!(reloaded.next_run_at.unwrap() > before, "next_run_at must advance strictly forward");
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn advance_disables_a_once_task_rather_than_rescheduling(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let task = fixtures::once_task(&ctx.pool, &org, Utc::now()).await;

    TaskStore::advance(&ctx.pool, &task, Utc::now()).await.expect("advance");
    let reloaded = TaskStore::find_by_id(&ctx.pool, task.id).await.expect("find");

    assert!(!reloaded.enabled);
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn soft_deleted_task_is_not_found_and_cannot_be_deleted_twice(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let task = fixtures::once_task(&ctx.pool, &org, Utc::now()).await;

    TaskStore::soft_delete(&ctx.pool, task.id).await.expect("soft delete");
    let find_result = TaskStore::find_by_id(&ctx.pool, task.id).await;
    assert!(find_result.is_err());

    let second_delete = TaskStore::soft_delete(&ctx.pool, task.id).await;
    assert!(second_delete.is_err(), "deleting an already soft-deleted task must not succeed silently");
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn update_on_an_already_enabled_task_leaves_next_run_at_untouched(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Pro).await;
    let task = fixtures::cron_task(&ctx.pool, &org, "* * * * *").await;
    let before = task.next_run_at.unwrap();

    let mut edited = task.clone();
    edited.timeout_ms = 5_000;
    let updated = TaskStore::update(&ctx.pool, &org, &task, edited).await.expect("update");

    assert_eq!(updated.timeout_ms, 5_000);
    assert_eq!(updated.next_run_at.unwrap(), before, "a field-only edit must not disturb an already-enabled schedule");
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn update_reactivating_a_disabled_task_recomputes_next_run_at_from_now(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Pro).await;
    let task = fixtures::cron_task(&ctx.pool, &org, "* * * * *").await;
    sqlx::query("UPDATE tasks SET enabled = false, next_run_at = NOW() - INTERVAL '1 day' WHERE id = $1")
        .bind(task.id)
        .execute(&ctx.pool)
        .await
        .expect("disable task");
    let disabled = TaskStore::find_by_id(&ctx.pool, task.id).await.expect("find");

    let mut reenabled = disabled.clone();
    reenabled.enabled = true;
    let updated = TaskStore::update(&ctx.pool, &org, &disabled, reenabled).await.expect("update");

    assert!(updated.next_run_at.unwrap() > Utc::now(), "reactivation must compute a fresh fire time, never the stale backlog one");
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn update_rejects_a_cron_expression_below_the_free_tier_floor(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let task = fixtures::once_task(&ctx.pool, &org, Utc::now()).await;

    let mut edited = task.clone();
    edited.schedule_type = ScheduleType::Cron;
    edited.cron_expression = Some("*/5 * * * *".to_string());
    let result = TaskStore::update(&ctx.pool, &org, &task, edited).await;
    assert!(result.is_err(), "re-validation on update must enforce the same free-tier floor as create");
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn clone_of_a_cron_task_computes_a_fresh_next_run_at(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Pro).await;
    let task = fixtures::cron_task(&ctx.pool, &org, "* * * * *").await;

    let cloned = TaskStore::clone(&ctx.pool, &task).await.expect("clone");

    assert_ne!(cloned.id, task.id);
    assert_eq!(cloned.cron_expression, task.cron_expression);
    assert!(cloned.enabled);
    assert!(cloned.next_run_at.unwrap() > Utc::now());
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn clone_of_a_past_due_once_task_is_shifted_an_hour_out(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let task = fixtures::once_task(&ctx.pool, &org, Utc::now() - chrono::Duration::days(1)).await;

    let cloned = TaskStore::clone(&ctx.pool, &task).await.expect("clone");

    let scheduled_at = cloned.scheduled_at.expect("once task carries scheduled_at");
    assert!(scheduled_at > Utc::now() + chrono::Duration::minutes(50), "a past-due clone must be pushed roughly an hour out");
    assert_eq!(cloned.next_run_at, cloned.scheduled_at);
}
