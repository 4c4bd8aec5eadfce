//! Long-running background service contract.
//!
//! A service owns a loop, is handed a `CancellationToken` it must respect,
//! and is driven to completion by a host that spawns it and waits on
//! shutdown.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()>;
}
