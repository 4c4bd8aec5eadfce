//! Application setup: router wiring and shared state.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::inbound::InboundReceiver;
use crate::monitor_checker::MonitorChecker;
use crate::notifier::NotificationBus;
use crate::server::routes;

/// Cap on inbound webhook request bodies, matching the stored task body cap.
const INBOUND_BODY_LIMIT_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub inbound: Arc<InboundReceiver>,
    pub monitor_checker: Arc<MonitorChecker>,
    pub notifications: NotificationBus,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::router())
        .layer(DefaultBodyLimit::max(INBOUND_BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
