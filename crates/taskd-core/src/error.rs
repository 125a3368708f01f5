//! Error taxonomy for the task engine.
//!
//! Leaf errors are `thiserror` enums; orchestration code (the scheduler,
//! worker pool, public API) widens them to `anyhow::Error` at call sites,
//! matching the rest of this codebase's convention.

use thiserror::Error;

/// Error returned from configuration resolution: a bad connection string,
/// an unrecognized engine scheme, or an invalid cron expression.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid database URL {0:?}: {1}")]
    InvalidDatabaseUrl(String, String),

    #[error("invalid cron expression {0:?}: {1}")]
    InvalidCronExpr(String, String),
}

/// Error returned by a registered handler.
///
/// Handlers return a plain message; the engine stringifies and persists it
/// in the task's `error` column.
#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

/// Error synthesized by the worker pool when a task's execution deadline
/// elapses. Carries the same retry treatment as [`HandlerError`].
#[derive(Debug, Error, Clone)]
#[error("task execution timed out after {0}s")]
pub struct TimeoutError(pub u64);

/// Lets handlers propagate [`TaskContext::check_timeout`] failures with `?`
/// straight out of their `Result<Value, HandlerError>` return type.
///
/// [`TaskContext::check_timeout`]: crate::context::TaskContext::check_timeout
impl From<TimeoutError> for HandlerError {
    fn from(e: TimeoutError) -> Self {
        Self(e.to_string())
    }
}
