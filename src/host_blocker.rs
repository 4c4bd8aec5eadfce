//! Per-tenant-per-host circuit breaker.
//!
//! Purely in-process: a blocked host is only blocked on the worker that
//! observed the failures, which is acceptable because the breaker is a
//! latency/politeness optimization, not a correctness guarantee — a
//! retry that slips past it just becomes another failed attempt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::common::service::Service;

/// Escalating backoff applied after consecutive failures against the same
/// (organization, host) pair, indexed by `min(failure_streak, len - 1)`.
const BACKOFF_STEPS_SECS: [u64; 4] = [30, 60, 120, 300];

#[derive(Debug, Clone, Copy)]
struct BlockState {
    /// Consecutive failures since the last block (or success). Reset to 0
    /// each time it trips a block, so a second block needs 3 more failures.
    failure_count: u32,
    /// Backoff index, persists across blocks so repeat offenders escalate.
    escalation_level: usize,
    blocked_until: Option<Instant>,
}

impl Default for BlockState {
    fn default() -> Self {
        Self {
            failure_count: 0,
            escalation_level: 0,
            blocked_until: None,
        }
    }
}

/// Shared, cloneable handle to the circuit breaker state. Workers hold a
/// clone each; the sweep service holds one too.
#[derive(Clone, Default)]
pub struct HostBlocker {
    state: Arc<DashMap<(uuid::Uuid, String), BlockState>>,
}

impl HostBlocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether dispatch to `host` on behalf of `organization_id` should be
    /// skipped right now.
    pub fn is_blocked(&self, organization_id: uuid::Uuid, host: &str) -> bool {
        self.state
            .get(&(organization_id, host.to_string()))
            .map(|entry| matches!(entry.blocked_until, Some(until) if Instant::now() < until))
            .unwrap_or(false)
    }

    /// Record a failed delivery. Only trips a block once three consecutive
    /// failures accumulate; each trip escalates the backoff index and
    /// resets the counter so the next block needs another three failures.
    pub fn record_failure(&self, organization_id: uuid::Uuid, host: &str) {
        let mut entry = self
            .state
            .entry((organization_id, host.to_string()))
            .or_default();
        entry.failure_count += 1;
        if entry.failure_count >= 3 {
            let idx = entry.escalation_level.min(BACKOFF_STEPS_SECS.len() - 1);
            let backoff = Duration::from_secs(BACKOFF_STEPS_SECS[idx]);
            entry.blocked_until = Some(Instant::now() + backoff);
            entry.escalation_level = (entry.escalation_level + 1).min(BACKOFF_STEPS_SECS.len() - 1);
            entry.failure_count = 0;
            debug!(host, escalation = entry.escalation_level, backoff_secs = backoff.as_secs(), "host blocked after consecutive failures");
        }
    }

    /// Explicitly block a host after a 429, honoring a server-supplied
    /// `Retry-After` when present.
    pub fn block_rate_limited(&self, organization_id: uuid::Uuid, host: &str, retry_after: Option<Duration>) {
        let backoff = retry_after.unwrap_or(Duration::from_secs(60));
        let mut entry = self
            .state
            .entry((organization_id, host.to_string()))
            .or_default();
        entry.blocked_until = Some(Instant::now() + backoff);
    }

    /// Clear the failure streak on a successful delivery.
    pub fn record_success(&self, organization_id: uuid::Uuid, host: &str) {
        self.state.remove(&(organization_id, host.to_string()));
    }

    /// Remaining time until `host` unblocks, if currently blocked.
    pub fn blocked_remaining(&self, organization_id: uuid::Uuid, host: &str) -> Option<Duration> {
        self.state.get(&(organization_id, host.to_string())).and_then(|entry| {
            entry.blocked_until.and_then(|until| {
                let now = Instant::now();
                if until > now {
                    Some(until - now)
                } else {
                    None
                }
            })
        })
    }

    /// Drop entries whose block window has elapsed and whose streak is
    /// exhausted, bounding the map's memory footprint.
    fn sweep(&self) -> usize {
        let before = self.state.len();
        self.state.retain(|_, entry| {
            matches!(entry.blocked_until, Some(until) if Instant::now() < until)
        });
        before.saturating_sub(self.state.len())
    }

    #[cfg(test)]
    fn snapshot(&self) -> HashMap<(uuid::Uuid, String), BlockState> {
        self.state.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }
}

/// Background service that periodically sweeps expired entries.
pub struct HostBlockerSweep {
    pub blocker: HostBlocker,
    pub interval: Duration,
}

#[async_trait::async_trait]
impl Service for HostBlockerSweep {
    fn name(&self) -> &'static str {
        "host-blocker-sweep"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(interval_secs = self.interval.as_secs(), "host blocker sweep starting");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.blocker.sweep();
                    if removed > 0 {
                        debug!(removed, "host blocker sweep removed expired entries");
                    }
                }
            }
        }
        info!("host blocker sweep stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> uuid::Uuid {
        uuid::Uuid::now_v7()
    }

    #[test]
    fn unblocked_host_is_not_blocked() {
        let blocker = HostBlocker::new();
        assert!(!blocker.is_blocked(org(), "example.com"));
    }

    #[test]
    fn single_failure_does_not_block() {
        let blocker = HostBlocker::new();
        let org_id = org();
        blocker.record_failure(org_id, "example.com");
        assert!(!blocker.is_blocked(org_id, "example.com"));
    }

    #[test]
    fn success_clears_streak_before_threshold() {
        let blocker = HostBlocker::new();
        let org_id = org();
        blocker.record_failure(org_id, "example.com");
        blocker.record_failure(org_id, "example.com");
        blocker.record_success(org_id, "example.com");
        blocker.record_failure(org_id, "example.com");
        assert!(!blocker.is_blocked(org_id, "example.com"));
    }

    #[test]
    fn success_clears_existing_block() {
        let blocker = HostBlocker::new();
        let org_id = org();
        for _ in 0..3 {
            blocker.record_failure(org_id, "example.com");
        }
        blocker.record_success(org_id, "example.com");
        assert!(!blocker.is_blocked(org_id, "example.com"));
    }

    #[test]
    fn third_consecutive_failure_trips_block() {
        let blocker = HostBlocker::new();
        let org_id = org();
        blocker.record_failure(org_id, "example.com");
        assert!(!blocker.is_blocked(org_id, "example.com"));
        blocker.record_failure(org_id, "example.com");
        assert!(!blocker.is_blocked(org_id, "example.com"));
        blocker.record_failure(org_id, "example.com");
        assert!(blocker.is_blocked(org_id, "example.com"));
    }

    #[test]
    fn repeat_blocks_escalate_backoff() {
        let blocker = HostBlocker::new();
        let org_id = org();
        for _ in 0..3 {
            blocker.record_failure(org_id, "example.com");
        }
        let first = blocker.snapshot();
        let first_state = first.get(&(org_id, "example.com".to_string())).unwrap();
        assert_eq!(first_state.escalation_level, 1);

        for _ in 0..3 {
            blocker.record_failure(org_id, "example.com");
        }
        let second = blocker.snapshot();
        let second_state = second.get(&(org_id, "example.com".to_string())).unwrap();
        assert_eq!(second_state.escalation_level, 2);
    }

    #[test]
    fn blocks_are_scoped_per_organization() {
        let blocker = HostBlocker::new();
        let a = org();
        let b = org();
        for _ in 0..3 {
            blocker.record_failure(a, "example.com");
        }
        assert!(blocker.is_blocked(a, "example.com"));
        assert!(!blocker.is_blocked(b, "example.com"));
    }
}
