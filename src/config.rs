//! Application configuration loaded from environment variables.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Runtime configuration for the scheduling core.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,

    /// How often the scheduler attempts its leader-election tick.
    pub scheduler_tick: Duration,
    /// Lookahead window: executions are created up to this far in advance.
    pub scheduler_lookahead: Duration,

    /// [min, max] live workers the pool maintains.
    pub worker_pool_min: usize,
    pub worker_pool_max: usize,
    /// How often the pool re-measures pending depth.
    pub worker_pool_interval: Duration,

    /// Threshold past which a `running` execution is considered abandoned.
    pub stale_execution_threshold: Duration,
    /// How often the cleanup sweep recovers stale executions.
    pub stale_sweep_interval: Duration,

    /// How often the execution counter buffer flushes to Postgres.
    pub exec_counter_flush_interval: Duration,

    /// How often the host-blocker sweeps expired entries.
    pub host_blocker_sweep_interval: Duration,

    /// How often the monitor checker sweeps for missed heartbeats.
    pub monitor_check_interval: Duration,

    /// Free-tier monthly execution quota.
    pub free_tier_monthly_quota: i64,
    /// Pro-tier monthly execution quota.
    pub pro_tier_monthly_quota: i64,

    /// Retention windows for the daily cleanup sweep.
    pub free_retention_days: i64,
    pub pro_retention_days: i64,
    /// Retention window for tenant-agnostic email/audit logs; unlike
    /// per-tenant data and idempotency keys (fixed at 24h), this window is
    /// configurable since it isn't tied to a tenant's tier.
    pub global_log_retention_days: i64,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults tuned for local development.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env_parse("PORT", 8080)?,

            scheduler_tick: Duration::from_secs(env_parse("SCHEDULER_TICK_SECONDS", 10)?),
            scheduler_lookahead: Duration::from_secs(env_parse(
                "SCHEDULER_LOOKAHEAD_SECONDS",
                10,
            )?),

            worker_pool_min: env_parse("WORKER_POOL_MIN", 2)?,
            worker_pool_max: env_parse("WORKER_POOL_MAX", 20)?,
            worker_pool_interval: Duration::from_secs(env_parse(
                "WORKER_POOL_INTERVAL_SECONDS",
                5,
            )?),

            stale_execution_threshold: Duration::from_secs(env_parse(
                "STALE_EXECUTION_THRESHOLD_MINUTES",
                5,
            )? * 60),
            stale_sweep_interval: Duration::from_secs(env_parse(
                "STALE_SWEEP_INTERVAL_MINUTES",
                5,
            )? * 60),

            exec_counter_flush_interval: Duration::from_secs(env_parse(
                "EXEC_COUNTER_FLUSH_SECONDS",
                5,
            )?),

            host_blocker_sweep_interval: Duration::from_secs(env_parse(
                "HOST_BLOCKER_SWEEP_SECONDS",
                30,
            )?),

            monitor_check_interval: Duration::from_secs(env_parse(
                "MONITOR_CHECK_INTERVAL_SECONDS",
                30,
            )?),

            free_tier_monthly_quota: env_parse("FREE_TIER_MONTHLY_QUOTA", 1_000)?,
            pro_tier_monthly_quota: env_parse("PRO_TIER_MONTHLY_QUOTA", 100_000)?,

            free_retention_days: env_parse("FREE_RETENTION_DAYS", 7)?,
            pro_retention_days: env_parse("PRO_RETENTION_DAYS", 30)?,
            global_log_retention_days: env_parse("GLOBAL_LOG_RETENTION_DAYS", 90)?,
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be valid: {e}")),
        Err(_) => Ok(default),
    }
}
