//! Convenience dispatch helpers that wrap [`super::TaskStateMachine`]
//! validation around the storage layer's own atomic transitions.
//!
//! Unlike the teacher's `dispatch` module, these do not issue their own
//! `UPDATE` statements: [`taskd_db::StorageAdapter::complete`] and
//! [`taskd_db::StorageAdapter::fail`] already carry the `WHERE status =
//! 'running'` guard that makes the transition atomic. This module exists so
//! call sites read by intent (`complete_task`, `fail_task`) rather than by
//! mechanism, and so the transition graph is checked even though the
//! storage layer would also reject a malformed one.

use taskd_db::{StorageAdapter, StorageError, TaskStatus};

use super::TaskStateMachine;

/// Mark a running task completed, optionally rescheduling it (cron).
pub async fn complete_task(
    storage: &dyn StorageAdapter,
    id: i64,
    result: serde_json::Value,
    reschedule_at: Option<i64>,
) -> Result<(), StorageError> {
    debug_assert!(TaskStateMachine::is_valid_transition(
        TaskStatus::Running,
        reschedule_at.map_or(TaskStatus::Completed, |_| TaskStatus::Pending)
    ));
    storage.complete(id, result, reschedule_at).await
}

/// Mark a running task failed, either rescheduled for retry or terminal.
///
/// `reset_retry_count` is true for a cron task's own-schedule reschedule,
/// where the next occurrence should not inherit the failed run's attempt
/// count.
pub async fn fail_task(
    storage: &dyn StorageAdapter,
    id: i64,
    error: &str,
    next_status: TaskStatus,
    next_run_time: i64,
    reset_retry_count: bool,
) -> Result<(), StorageError> {
    debug_assert!(TaskStateMachine::is_valid_transition(
        TaskStatus::Running,
        next_status
    ));
    storage
        .fail(id, error, next_status, next_run_time, reset_retry_count)
        .await
}
