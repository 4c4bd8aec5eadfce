//! HTTP surface: health check and the two tenant-facing receivers,
//! inbound webhook fan-out and monitor pings.

pub mod app;
pub mod routes;

pub use app::{build_app, AppState};
