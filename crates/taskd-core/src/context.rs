//! The context a running handler observes.

use chrono::Utc;

use crate::error::TimeoutError;

/// Everything a handler needs about the task it is executing.
///
/// Constructed by the worker pool immediately before dispatch and handed to
/// the handler by value; handlers that suspend across await points should
/// call [`TaskContext::check_timeout`] at natural checkpoints so long-running
/// work can exit early instead of waiting for the pool's hard `tokio::time::timeout`.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: i64,
    pub name: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    /// Attempt number for this execution, 1-indexed (the first try is 1).
    pub attempt: i32,
    deadline: chrono::DateTime<Utc>,
    timeout_secs: u64,
}

impl TaskContext {
    pub fn new(
        id: i64,
        name: String,
        payload: serde_json::Value,
        priority: i32,
        attempt: i32,
        timeout_secs: u64,
    ) -> Self {
        let deadline = Utc::now() + chrono::Duration::seconds(timeout_secs as i64);
        Self {
            id,
            name,
            payload,
            priority,
            attempt,
            deadline,
            timeout_secs,
        }
    }

    /// Returns an error if the task's deadline has already passed.
    ///
    /// Well-behaved handlers call this between units of work and propagate
    /// the error with `?`; it does not by itself stop the handler, since the
    /// engine cannot preempt arbitrary async code (see the cooperative
    /// cancellation note in the design docs).
    pub fn check_timeout(&self) -> Result<(), TimeoutError> {
        if Utc::now() >= self.deadline {
            Err(TimeoutError(self.timeout_secs))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_has_not_timed_out() {
        let ctx = TaskContext::new(1, "job".into(), serde_json::json!({}), 0, 1, 60);
        assert!(ctx.check_timeout().is_ok());
    }

    #[test]
    fn zero_timeout_is_already_expired() {
        let ctx = TaskContext::new(1, "job".into(), serde_json::json!({}), 0, 1, 0);
        assert!(ctx.check_timeout().is_err());
    }
}
