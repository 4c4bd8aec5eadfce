//! Execution worker: claims due executions, dispatches outbound HTTP,
//! classifies the outcome, and schedules retries.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Client;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::service::Service;
use crate::crypto;
use crate::exec_counter::ExecCounter;
use crate::host_blocker::HostBlocker;
use crate::models::{Execution, ExecutionStatus, Organization, ScheduleType, Task};
use crate::notifier::{NotificationBus, NotificationEvent, WorkerWake};
use crate::store::{ExecutionStore, OrganizationStore, TaskStore};

/// Delivery delays for the asynchronous callback notification: the first
/// attempt is immediate, these gate the two retries.
const CALLBACK_RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(5), Duration::from_secs(20)];

/// Idle poll backoff: a worker with no claimable execution sleeps this
/// long before retrying, unless woken sooner by `WorkerWake` (a latency
/// optimization, never relied on for correctness). Starts at the floor and
/// doubles on every consecutive empty poll, capped at the ceiling.
const IDLE_BACKOFF_FLOOR: Duration = Duration::from_secs(2);
const IDLE_BACKOFF_CEILING: Duration = Duration::from_secs(5);

/// A worker that has gone this long without claiming anything exits
/// normally rather than keep polling — scale-down is implicit, the pool's
/// own rescan brings the worker count back up if demand returns.
const IDLE_EXIT_AFTER: Duration = Duration::from_secs(300);

pub struct Worker {
    pub id: String,
    pub pool: PgPool,
    pub http: Client,
    pub host_blocker: HostBlocker,
    pub exec_counter: ExecCounter,
    pub notifications: NotificationBus,
    pub wake: WorkerWake,
}

impl Worker {
    pub fn new(
        id: String,
        pool: PgPool,
        host_blocker: HostBlocker,
        exec_counter: ExecCounter,
        notifications: NotificationBus,
        wake: WorkerWake,
    ) -> Self {
        Self {
            id,
            pool,
            http: Client::new(),
            host_blocker,
            exec_counter,
            notifications,
            wake,
        }
    }

    /// Claim and process a single execution. Returns `true` if one was
    /// claimed (regardless of outcome), `false` if the queue was empty.
    async fn process_one(&self) -> anyhow::Result<bool> {
        let execution = match ExecutionStore::claim_next(&self.pool).await? {
            Some(e) => e,
            None => return Ok(false),
        };

        let task = match TaskStore::find_by_id(&self.pool, execution.task_id).await {
            Ok(t) => t,
            Err(crate::CoreError::NotFound) => {
                // Task was hard-deleted out from under a scheduled execution;
                // nothing left to dispatch to.
                ExecutionStore::fail(
                    &self.pool,
                    execution.id,
                    None,
                    None,
                    Some("task no longer exists".to_string()),
                    0,
                )
                .await?;
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };

        if task.is_deleted() {
            ExecutionStore::fail(
                &self.pool,
                execution.id,
                None,
                None,
                Some("task has been deleted".to_string()),
                0,
            )
            .await?;
            return Ok(true);
        }

        let host = task.host();
        if let Some(host) = &host {
            if self.host_blocker.is_blocked(task.organization_id, host) {
                // Re-queue for a later attempt rather than burn this claim
                // on a host we already know is failing.
                self.requeue_blocked(&execution, &task).await?;
                return Ok(true);
            }
        }

        self.dispatch(&execution, &task).await?;
        Ok(true)
    }

    /// Host-block check: reschedule rather than burn this
    /// claim against a host already known to be failing. Unconditional —
    /// not gated on `retry_attempts`, since this isn't a delivery attempt.
    async fn requeue_blocked(&self, execution: &Execution, task: &Task) -> anyhow::Result<()> {
        let remaining = task
            .host()
            .and_then(|host| self.host_blocker.blocked_remaining(task.organization_id, &host))
            .unwrap_or(Duration::from_secs(30));
        let retry_at = Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_default();
        ExecutionStore::fail(
            &self.pool,
            execution.id,
            None,
            None,
            Some("host temporarily blocked".to_string()),
            0,
        )
        .await?;
        ExecutionStore::create_pending(&self.pool, task, retry_at, execution.attempt).await?;
        Ok(())
    }

    async fn dispatch(&self, execution: &Execution, task: &Task) -> anyhow::Result<()> {
        let org = OrganizationStore::find_by_id(&self.pool, task.organization_id).await?;
        let body = task.body.clone().unwrap_or_default();
        let signature = crypto::sign(&org.webhook_secret, body.as_bytes());

        let method = reqwest::Method::from_bytes(task.method.as_bytes()).unwrap_or(reqwest::Method::POST);
        let mut request = self
            .http
            .request(method, &task.url)
            .timeout(Duration::from_millis(task.timeout_ms as u64))
            .header("X-Runlater-Signature", signature)
            .header("X-Runlater-Execution-Id", execution.id.to_string());

        for (key, value) in task.header_map() {
            request = request.header(key, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let started = Instant::now();
        let outcome = request.send().await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(response) => self.handle_response(execution, task, &org, response, duration_ms).await,
            Err(e) if e.is_timeout() => self.handle_timeout(execution, task, &org, duration_ms).await,
            Err(e) => self.handle_failure(execution, task, &org, e.to_string(), duration_ms).await,
        }
    }

    async fn handle_response(
        &self,
        execution: &Execution,
        task: &Task,
        org: &Organization,
        response: reqwest::Response,
        duration_ms: i64,
    ) -> anyhow::Result<()> {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let body_text = response.text().await.unwrap_or_default();
        let truncated = Execution::truncate_response_body(&body_text);

        if status.is_success() {
            ExecutionStore::complete(&self.pool, execution.id, status.as_u16() as i32, Some(truncated), duration_ms)
                .await?;
            if let Some(host) = task.host() {
                self.host_blocker.record_success(task.organization_id, &host);
            }
            self.exec_counter.increment(task.organization_id);
            self.exec_counter.record_last_execution(task.id, Utc::now());
            self.spawn_callback(task, org, execution, "success", Some(status.as_u16() as i32), None, duration_ms);
            return Ok(());
        }

        if status.as_u16() == 429 {
            if let Some(host) = task.host() {
                self.host_blocker.block_rate_limited(task.organization_id, &host, retry_after);
            }
        } else if let Some(host) = task.host() {
            self.host_blocker.record_failure(task.organization_id, &host);
        }

        self.fail_and_maybe_retry(
            execution,
            task,
            org,
            Some(status.as_u16() as i32),
            Some(truncated),
            format!("non-2xx response: {status}"),
            duration_ms,
        )
        .await
    }

    async fn handle_timeout(&self, execution: &Execution, task: &Task, org: &Organization, duration_ms: i64) -> anyhow::Result<()> {
        if let Some(host) = task.host() {
            self.host_blocker.record_failure(task.organization_id, &host);
        }
        ExecutionStore::timeout(&self.pool, execution.id, duration_ms).await?;
        self.exec_counter.increment(task.organization_id);
        self.exec_counter.record_last_execution(task.id, Utc::now());
        self.spawn_callback(task, org, execution, "timeout", None, Some("request timed out".to_string()), duration_ms);
        self.maybe_schedule_retry(execution, task, org, "request timed out").await
    }

    async fn handle_failure(&self, execution: &Execution, task: &Task, org: &Organization, message: String, duration_ms: i64) -> anyhow::Result<()> {
        if let Some(host) = task.host() {
            self.host_blocker.record_failure(task.organization_id, &host);
        }
        self.fail_and_maybe_retry(execution, task, org, None, None, message, duration_ms).await
    }

    async fn fail_and_maybe_retry(
        &self,
        execution: &Execution,
        task: &Task,
        org: &Organization,
        response_status: Option<i32>,
        response_body: Option<String>,
        message: String,
        duration_ms: i64,
    ) -> anyhow::Result<()> {
        ExecutionStore::fail(&self.pool, execution.id, response_status, response_body, Some(message.clone()), duration_ms).await?;
        self.exec_counter.increment(task.organization_id);
        self.exec_counter.record_last_execution(task.id, Utc::now());
        self.spawn_callback(task, org, execution, "failed", response_status, Some(message.clone()), duration_ms);
        self.maybe_schedule_retry(execution, task, org, &message).await
    }

    /// Retry policy: only `once` tasks retry here — a
    /// recurring task's next scheduled fire is its implicit retry. Always
    /// followed by the failure-notification check (step 8), independent of
    /// whether a retry was scheduled.
    async fn maybe_schedule_retry(&self, execution: &Execution, task: &Task, org: &Organization, message: &str) -> anyhow::Result<()> {
        if task.schedule_type == ScheduleType::Once && execution.attempt < task.retry_attempts {
            let delay = Self::retry_delay(execution.attempt);
            let retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            ExecutionStore::create_pending(&self.pool, task, retry_at, execution.attempt + 1).await?;
            debug!(task_id = %task.id, attempt = execution.attempt + 1, delay_secs = delay.as_secs(), "scheduled retry");
        } else {
            warn!(task_id = %task.id, execution_id = %execution.id, error = message, "task exhausted retries");
        }

        self.maybe_notify_failure(execution, task, org, message).await
    }

    /// Publish a `task.failing` notification on a failure status change:
    /// the task's previous terminal execution was `success` (or this is
    /// the first execution) and the current one is terminal-failed.
    async fn maybe_notify_failure(&self, execution: &Execution, task: &Task, org: &Organization, message: &str) -> anyhow::Result<()> {
        let last_terminal = ExecutionStore::last_terminal_for_task(&self.pool, task.id).await.ok().flatten();
        let was_previously_healthy = last_terminal
            .map(|e| matches!(e.status, ExecutionStatus::Success))
            .unwrap_or(true);

        if was_previously_healthy {
            self.notifications.publish(NotificationEvent::TaskFailing {
                organization_id: org.id,
                task_id: task.id,
                execution_id: execution.id,
                error_message: Some(message.to_string()),
                occurred_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Quadratic backoff: `attempt² × 5s`.
    fn retry_delay(attempt: i32) -> Duration {
        let a = attempt.max(1) as u64;
        Duration::from_secs(a * a * 5)
    }

    /// Fire-and-forget a signed JSON summary to the task's callback URL, if
    /// set. Runs detached from the claiming loop so a slow or
    /// dead callback endpoint never delays the next claim.
    fn spawn_callback(
        &self,
        task: &Task,
        org: &Organization,
        execution: &Execution,
        status: &str,
        response_status: Option<i32>,
        error_message: Option<String>,
        duration_ms: i64,
    ) {
        let Some(url) = task.callback_url.clone() else {
            return;
        };

        let http = self.http.clone();
        let secret = org.webhook_secret.clone();
        let body = serde_json::json!({
            "execution_id": execution.id,
            "task_id": task.id,
            "status": status,
            "response_status": response_status,
            "error_message": error_message,
            "duration_ms": duration_ms,
        })
        .to_string();

        tokio::spawn(async move {
            let signature = crypto::sign(&secret, body.as_bytes());
            let mut delays = std::iter::once(None).chain(CALLBACK_RETRY_DELAYS.into_iter().map(Some));

            while let Some(delay) = delays.next() {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                match http
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .header("X-Runlater-Signature", &signature)
                    .body(body.clone())
                    .send()
                    .await
                {
                    Ok(response) if response.status().is_success() => return,
                    Ok(response) => warn!(url, status = %response.status(), "callback delivery returned non-2xx"),
                    Err(e) => warn!(url, error = %e, "callback delivery failed"),
                }
            }
        });
    }
}

/// Parse a `Retry-After` header value: either delta-seconds (a positive
/// integer) or an RFC 7231 IMF-fixdate (`Thu, 06 Feb 2026 13:00:00 GMT`).
/// Malformed values and dates already in the past yield `None`, leaving the
/// caller's own default in effect.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<i64>() {
        return (secs > 0).then(|| Duration::from_secs(secs as u64));
    }

    let parsed = chrono::NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT").ok()?;
    let target = DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc);
    let remaining = (target - now).num_seconds();
    (remaining > 0).then(|| Duration::from_secs(remaining as u64))
}

#[async_trait::async_trait]
impl Service for Worker {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(worker_id = %self.id, "worker starting");

        let mut idle_elapsed = Duration::ZERO;
        let mut backoff = IDLE_BACKOFF_FLOOR;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.process_one().await {
                Ok(true) => {
                    idle_elapsed = Duration::ZERO;
                    backoff = IDLE_BACKOFF_FLOOR;
                    continue;
                }
                Ok(false) => {
                    if idle_elapsed >= IDLE_EXIT_AFTER {
                        info!(worker_id = %self.id, "worker exiting after sustained idle period");
                        break;
                    }

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.wake.notified() => {
                            idle_elapsed = Duration::ZERO;
                            backoff = IDLE_BACKOFF_FLOOR;
                        }
                        _ = tokio::time::sleep(backoff) => {
                            idle_elapsed += backoff;
                            backoff = (backoff * 2).min(IDLE_BACKOFF_CEILING);
                        }
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "worker iteration failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!(worker_id = %self.id, "worker stopped");
        Ok(())
    }
}
