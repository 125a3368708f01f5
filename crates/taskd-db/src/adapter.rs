//! The [`StorageAdapter`] trait: the one contract every supported engine
//! (SQLite, MySQL, PostgreSQL) satisfies.
//!
//! The scheduler, worker pool, and public API in `taskd-core` talk to
//! storage exclusively through this trait, so none of that code needs to
//! know which engine is behind it.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{NewTask, Task, TaskStatus};

/// CRUD and atomic-claim contract over the `tasks` table.
///
/// Implementations must uphold the ordering contract on [`claim_ready`]:
/// among rows matching `status = 'pending' AND next_run_time <= now`, the
/// `limit` rows with the smallest `next_run_time` are claimed first, ties
/// broken by highest `priority`, then smallest `id`. Claiming must be atomic
/// with respect to other callers within the same process: two concurrent
/// `claim_ready` calls must never return the same row.
///
/// [`claim_ready`]: StorageAdapter::claim_ready
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Idempotent schema creation: creates the `tasks` table and its
    /// indices if they do not already exist.
    async fn setup(&self) -> Result<(), StorageError>;

    /// Insert a new task with `status = pending`. Returns the assigned id.
    async fn insert(&self, task: &NewTask) -> Result<i64, StorageError>;

    /// Atomically select up to `limit` ready tasks and mark them `running`.
    ///
    /// "Ready" means `status = pending AND next_run_time <= now`. Claimed
    /// rows have `last_active_time` set to `now` and `retry_count`
    /// incremented by one, in the same transaction as the selection.
    async fn claim_ready(&self, now: i64, limit: i64) -> Result<Vec<Task>, StorageError>;

    /// Mark a task `completed` with the given success payload (async), or
    /// reschedule it to `pending` at `next_run_time` with `retry_count`
    /// reset to zero (cron).
    async fn complete(
        &self,
        id: i64,
        result: serde_json::Value,
        reschedule_at: Option<i64>,
    ) -> Result<(), StorageError>;

    /// Persist a failed attempt: either back to `pending` at `next_run_time`
    /// (retry still available) or terminally `permanently_failed`.
    ///
    /// `reset_retry_count` is set by cron failures, which reschedule to
    /// `pending` without consuming a retry slot — the next occurrence starts
    /// fresh at `retry_count = 0` rather than accumulating across runs.
    async fn fail(
        &self,
        id: i64,
        error: &str,
        next_status: TaskStatus,
        next_run_time: i64,
        reset_retry_count: bool,
    ) -> Result<(), StorageError>;

    /// Fetch a single task by id.
    async fn get_by_id(&self, id: i64) -> Result<Option<Task>, StorageError>;

    /// Fetch all tasks registered under a given handler name.
    async fn get_by_name(&self, name: &str) -> Result<Vec<Task>, StorageError>;

    /// Fetch all tasks currently in a given status.
    async fn get_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StorageError>;

    /// Reset any task left `running` (e.g. by a crashed prior process) back
    /// to `pending` with `next_run_time = now`. Returns the reset rows.
    async fn reset_orphaned(&self, now: i64) -> Result<Vec<Task>, StorageError>;

    /// Operator override: force a `permanently_failed` task back to `pending`
    /// at `next_run_time = now`, with `retry_count` and `error` cleared.
    /// A no-op (returns `false`) if the task is not currently
    /// `permanently_failed` — this does not reopen a `completed` or
    /// in-flight task.
    async fn requeue(&self, id: i64, now: i64) -> Result<bool, StorageError>;

    /// Test helper: remove every row from `tasks`.
    async fn clear_tasks(&self) -> Result<(), StorageError>;
}
