//! Core error taxonomy.
//!
//! Library-internal code returns `CoreError` so callers can match on the
//! failure kind (validation vs. transient vs. not-found); orchestration
//! code (background-routine bodies, `main`) uses `anyhow::Result` with
//! `.context(...)` for ambient failures it only needs to log.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("url rejected: {0}")]
    UrlGuard(#[from] crate::urlguard::UrlGuardError),

    #[error("not found")]
    NotFound,

    #[error("task has been deleted")]
    TaskDeleted,

    #[error("monitor is disabled")]
    MonitorDisabled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
}
