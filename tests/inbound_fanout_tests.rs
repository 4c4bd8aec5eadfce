//! Inbound fan-out atomicity: `task_ids` is fully populated across every
//! forward URL or the event records none at all.

mod common;

use common::fixtures;
use runlater_core::inbound::InboundReceiver;
use runlater_core::models::Tier;
use runlater_core::notifier::WorkerWake;
use runlater_core::store::EndpointStore;
use test_context::test_context;

#[test_context(common::TestHarness)]
#[tokio::test]
async fn receive_fans_out_one_task_per_forward_url(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let endpoint = EndpointStore::create(
        &ctx.pool,
        org.id,
        "acme-webhook",
        vec!["https://downstream-a.example.com/hook".to_string(), "https://downstream-b.example.com/hook".to_string()],
    )
    .await
    .expect("create endpoint");

    let receiver = InboundReceiver::new(ctx.pool.clone(), WorkerWake::new());
    let event = receiver
        .receive(&endpoint, "POST", serde_json::json!({"content-type": "application/json"}), Some("{}"), Some("203.0.113.1"))
        .await
        .expect("receive");

    assert_eq!(event.task_ids.len(), 2, "one task per configured forward URL");

    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM executions WHERE task_id = ANY($1) AND status = 'pending'")
        .bind(&event.task_ids)
        .fetch_one(&ctx.pool)
        .await
        .expect("count pending executions");
    assert_eq!(pending, 2, "every forward task must have its driving execution created in the same transaction");
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn receive_drops_hop_by_hop_headers_before_forwarding(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let endpoint = EndpointStore::create(&ctx.pool, org.id, "acme-trimmed", vec!["https://downstream.example.com/hook".to_string()])
        .await
        .expect("create endpoint");

    let receiver = InboundReceiver::new(ctx.pool.clone(), WorkerWake::new());
    let event = receiver
        .receive(
            &endpoint,
            "POST",
            serde_json::json!({"Content-Type": "application/json", "Connection": "keep-alive", "Host": "original.example.com"}),
            None,
            None,
        )
        .await
        .expect("receive");

    let forwarded_headers: serde_json::Value =
        sqlx::query_scalar("SELECT headers FROM tasks WHERE id = $1").bind(event.task_ids[0]).fetch_one(&ctx.pool).await.expect("load task headers");

    let obj = forwarded_headers.as_object().expect("headers object");
    assert!(obj.contains_key("Content-Type"));
    assert!(!obj.contains_key("Connection"));
    assert!(!obj.contains_key("Host"));
}

#[test_context(common::TestHarness)]
#[tokio::test]
async fn replay_refires_every_recorded_forward_task(ctx: &common::TestHarness) {
    let org = fixtures::org(&ctx.pool, Tier::Free).await;
    let endpoint = EndpointStore::create(
        &ctx.pool,
        org.id,
        "acme-replay",
        vec!["https://downstream-a.example.com/hook".to_string(), "https://downstream-b.example.com/hook".to_string()],
    )
    .await
    .expect("create endpoint");

    let receiver = InboundReceiver::new(ctx.pool.clone(), WorkerWake::new());
    let event = receiver.receive(&endpoint, "POST", serde_json::json!({}), None, None).await.expect("receive");

    let replayed = receiver.replay(&event).await.expect("replay");
    assert_eq!(replayed.len(), event.task_ids.len());

    for task_id in &event.task_ids {
        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM executions WHERE task_id = $1 AND status = 'pending'")
            .bind(task_id)
            .fetch_one(&ctx.pool)
            .await
            .expect("count pending executions");
        assert_eq!(pending, 2, "the original fan-out execution plus the replayed one");
    }
}
