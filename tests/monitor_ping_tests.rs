//! Monitor ping handling and the overdue sweep's down/recovered transitions.

mod common;

use std::time::Duration;

use common::fixtures;
use runlater_core::models::{MonitorStatus, Tier};
use runlater_core::monitor_checker::MonitorChecker;
use runlater_core::notifier::{NotificationBus, NotificationEvent};
use runlater_core::store::MonitorStore;
use test_context::test_context;

#[test_context(common::TestHarness)]
#[tokio::test]
async fn ping_against_unknown_token_errors(ctx: &common::TestHarness) {
    let checker = MonitorChecker::new(ctx.pool.clone(), Duration::from_secs(30), NotificationBus::new(16));
    let result = checker.handle_ping("does-not-exist").await;
    assert!(result.is_err());
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn ping_against_disabled_monitor_is_rejected(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let monitor = fixtures::interval_monitor(&ctx.pool, &org, 60, 30).await;
    sqlx::query("UPDATE monitors SET enabled = false WHERE id = $1")
        .bind(monitor.id)
        .execute(&ctx.pool)
        .await
        .expect("disable monitor");

    let checker = MonitorChecker::new(ctx.pool.clone(), Duration::from_secs(30), NotificationBus::new(16));
    let result = checker.handle_ping(&monitor.token).await;
    assert!(matches!(result, Err(runlater_core::error::CoreError::MonitorDisabled)));
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn sweep_marks_overdue_monitor_down_and_publishes(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let monitor = fixtures::interval_monitor(&ctx.pool, &org, 60, 0).await;
    sqlx::query("UPDATE monitors SET next_expected_at = NOW() - INTERVAL '5 minutes' WHERE id = $1")
        .bind(monitor.id)
        .execute(&ctx.pool)
        .await
        .expect("back-date next_expected_at");

    let notifications = NotificationBus::new(16);
    let mut rx = notifications.subscribe();
    let checker = MonitorChecker::new(ctx.pool.clone(), Duration::from_secs(30), notifications);
    checker.sweep().await.expect("sweep");

    let reloaded = MonitorStore::find_by_token(&ctx.pool, &monitor.token).await.expect("find");
    assert_eq!(reloaded.status, MonitorStatus::Down);

    let event = rx.recv().await.expect("down event published");
    assert!(matches!(event, NotificationEvent::MonitorDown { monitor_id, .. } if monitor_id == monitor.id));
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn ping_after_down_reports_recovery_and_publishes(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let monitor = fixtures::interval_monitor(&ctx.pool, &org, 60, 0).await;
    sqlx::query("UPDATE monitors SET status = 'down' WHERE id = $1")
        .bind(monitor.id)
        .execute(&ctx.pool)
        .await
        .expect("mark down directly");

    let notifications = NotificationBus::new(16);
    let mut rx = notifications.subscribe();
    let checker = MonitorChecker::new(ctx.pool.clone(), Duration::from_secs(30), notifications);

    let recovered = checker.handle_ping(&monitor.token).await.expect("ping");
    assert!(recovered, "a ping on a down monitor must report recovery");

    let reloaded = MonitorStore::find_by_token(&ctx.pool, &monitor.token).await.expect("find");
    assert_eq!(reloaded.status, MonitorStatus::Up);

    let event = rx.recv().await.expect("recovered event published");
    assert!(matches!(event, NotificationEvent::MonitorRecovered { monitor_id, .. } if monitor_id == monitor.id));
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn ping_while_up_does_not_report_recovery(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let monitor = fixtures::interval_monitor(&ctx.pool, &org, 60, 0).await;

    let checker = MonitorChecker::new(ctx.pool.clone(), Duration::from_secs(30), NotificationBus::new(16));
    let recovered = checker.handle_ping(&monitor.token).await.expect("ping");
    assert!(!recovered, "a monitor that was never down has nothing to recover from");
}
