pub mod health;
pub mod inbound;
pub mod ping;

use axum::routing::{any, get};
use axum::Router;

use crate::server::app::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/in/:slug", any(inbound::inbound_handler))
        .route("/ping/:token", any(ping::ping_handler))
}
