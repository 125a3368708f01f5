//! Worker pool: bounded concurrent task execution with timeout enforcement.
//!
//! Mirrors the concurrency-limiting pattern used elsewhere in this
//! codebase's orchestration layer (`Semaphore`-gated `tokio::spawn`, an
//! `AtomicUsize` in-flight counter the scheduler uses for admission), scaled
//! down to this engine's simpler, dependency-free task model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use taskd_db::{StorageAdapter, Task, TaskStatus, TaskType};
use tokio::sync::Semaphore;

use crate::context::TaskContext;
use crate::cron::cron_next;
use crate::registry::HandlerRegistry;
use crate::retry::{next_after_failure, RetryDecision};
use crate::state::dispatch;

/// Bounded pool that runs claimed tasks against their registered handlers.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    registry: Arc<HandlerRegistry>,
    storage: Arc<dyn StorageAdapter>,
    in_flight: Arc<AtomicUsize>,
    in_flight_timeouts: Arc<Mutex<HashMap<i64, u64>>>,
}

impl WorkerPool {
    pub fn new(
        max_concurrent_tasks: usize,
        registry: Arc<HandlerRegistry>,
        storage: Arc<dyn StorageAdapter>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks)),
            registry,
            storage,
            in_flight: Arc::new(AtomicUsize::new(0)),
            in_flight_timeouts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of tasks currently dispatched (claimed but not yet completed).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Largest `timeout` among currently in-flight tasks, or `None` if the
    /// pool is idle. Used to size the `stop()` shutdown grace window.
    pub fn max_in_flight_timeout(&self) -> Option<u64> {
        self.in_flight_timeouts
            .lock()
            .unwrap()
            .values()
            .copied()
            .max()
    }

    /// Spawn a claimed task onto the pool.
    ///
    /// Returns immediately; the task runs on its own `tokio` task and
    /// updates storage itself when it finishes. The scheduler uses
    /// [`WorkerPool::in_flight`] for admission control, so this does not
    /// block on semaphore acquisition — the permit is acquired inside the
    /// spawned task, which only matters if the scheduler ever over-admits.
    pub fn spawn(&self, task: Task) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.in_flight_timeouts
            .lock()
            .unwrap()
            .insert(task.id, task.timeout as u64);

        let semaphore = Arc::clone(&self.semaphore);
        let registry = Arc::clone(&self.registry);
        let storage = Arc::clone(&self.storage);
        let in_flight = Arc::clone(&self.in_flight);
        let in_flight_timeouts = Arc::clone(&self.in_flight_timeouts);
        let task_id = task.id;
        let task_name = task.name.clone();

        // The inner task is spawned separately from the joiner below so a
        // handler panic is caught via the JoinHandle's error path instead
        // of terminating the pool (tokio's default panic hook only logs).
        let join = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            run_one(&task, &registry, &storage).await
        });

        tokio::spawn(async move {
            let result = join.await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            in_flight_timeouts.lock().unwrap().remove(&task_id);

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        task_id, task_name = %task_name, error = %e,
                        "storage update failed after task execution; task may appear stuck until reset_orphaned recovers it"
                    );
                }
                Err(join_err) if join_err.is_panic() => {
                    tracing::error!(
                        task_id, task_name = %task_name,
                        "handler panicked; task left running, will be recovered by reset_orphaned on next start()"
                    );
                }
                Err(join_err) => {
                    tracing::warn!(task_id, task_name = %task_name, error = %join_err, "task join failed (cancelled?)");
                }
            }
        });
    }
}

/// Run a single claimed task to completion against its handler, then
/// persist the outcome.
async fn run_one(
    task: &Task,
    registry: &HandlerRegistry,
    storage: &dyn StorageAdapter,
) -> Result<(), taskd_db::StorageError> {
    let Some(handler) = registry.get(&task.name) else {
        tracing::error!(task_id = task.id, task_name = %task.name, "no handler for task");
        return storage
            .fail(
                task.id,
                &format!("no handler for {}", task.name),
                TaskStatus::PermanentlyFailed,
                Utc::now().timestamp(),
                false,
            )
            .await;
    };

    let ctx = TaskContext::new(
        task.id,
        task.name.clone(),
        task.payload.clone(),
        task.priority,
        task.retry_count,
        task.timeout as u64,
    );

    tracing::info!(task_id = task.id, task_name = %task.name, attempt = task.retry_count, "dispatching task");

    let outcome = tokio::time::timeout(Duration::from_secs(task.timeout as u64), handler.call(ctx)).await;

    match outcome {
        Ok(Ok(result)) => on_success(task, result, storage).await,
        Ok(Err(e)) => on_failure(task, &e.0, storage).await,
        Err(_elapsed) => {
            tracing::warn!(task_id = task.id, task_name = %task.name, "task timed out");
            on_failure(task, &format!("task execution timed out after {}s", task.timeout), storage).await
        }
    }
}

/// Run a storage write, and on failure retry it exactly once before giving
/// up. Per the documented recovery behavior, a `complete`/`fail` write that
/// fails is retried once in-memory; if the retry also fails the error is
/// logged by the caller and the task is left `running` for
/// `reset_orphaned` to recover on the next `start()`.
async fn write_with_retry<F, Fut>(task_id: i64, task_name: &str, op: &str, f: F) -> Result<(), taskd_db::StorageError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), taskd_db::StorageError>>,
{
    match f().await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!(task_id, task_name, op, error = %e, "storage write failed, retrying once");
            f().await
        }
    }
}

async fn on_success(
    task: &Task,
    result: serde_json::Value,
    storage: &dyn StorageAdapter,
) -> Result<(), taskd_db::StorageError> {
    if task.task_type == TaskType::Cron {
        let cron_expr = task.cron_expr.as_deref().unwrap_or_default();
        let now = Utc::now().timestamp();
        let next = cron_next(cron_expr, now).unwrap_or(now + 60);
        tracing::info!(task_id = task.id, task_name = %task.name, next_run_time = next, "cron task completed, rescheduling");
        write_with_retry(task.id, &task.name, "complete", || {
            dispatch::complete_task(storage, task.id, result.clone(), Some(next))
        })
        .await
    } else {
        tracing::info!(task_id = task.id, task_name = %task.name, "task completed");
        write_with_retry(task.id, &task.name, "complete", || {
            dispatch::complete_task(storage, task.id, result.clone(), None)
        })
        .await
    }
}

async fn on_failure(task: &Task, error: &str, storage: &dyn StorageAdapter) -> Result<(), taskd_db::StorageError> {
    let now = Utc::now().timestamp();

    if task.task_type == TaskType::Cron {
        // A failed cron task does not retry; it simply fires again on its
        // own schedule with retry_count reset.
        let cron_expr = task.cron_expr.as_deref().unwrap_or_default();
        let next = cron_next(cron_expr, now).unwrap_or(now + 60);
        tracing::warn!(task_id = task.id, task_name = %task.name, error, next_run_time = next, "cron task failed, rescheduling for next occurrence");
        return write_with_retry(task.id, &task.name, "fail", || {
            dispatch::fail_task(storage, task.id, error, TaskStatus::Pending, next, true)
        })
        .await;
    }

    match next_after_failure(task.retry_count, task.max_retries, task.retry_interval, now) {
        RetryDecision::Retry { next_run_time } => {
            tracing::warn!(task_id = task.id, task_name = %task.name, error, attempt = task.retry_count, next_run_time, "task failed, retry scheduled");
            write_with_retry(task.id, &task.name, "fail", || {
                dispatch::fail_task(storage, task.id, error, TaskStatus::Pending, next_run_time, false)
            })
            .await
        }
        RetryDecision::PermanentlyFailed => {
            tracing::warn!(task_id = task.id, task_name = %task.name, error, attempts = task.retry_count, "task permanently failed, retries exhausted");
            write_with_retry(task.id, &task.name, "fail", || {
                dispatch::fail_task(storage, task.id, error, TaskStatus::PermanentlyFailed, now, false)
            })
            .await
        }
    }
}
