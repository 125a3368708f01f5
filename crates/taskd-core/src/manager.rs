//! Public API: the `TaskManager` facade applications embed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskd_db::{DbConfig, NewTask, StorageAdapter, Task, TaskStatus, TaskType};

use crate::config::TaskManagerConfig;
use crate::cron::{cron_next, validate as validate_cron};
use crate::registry::{Handler, HandlerRegistry};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::worker::WorkerPool;

const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Options accepted by [`TaskManager::async_task`]/[`TaskManager::cron`].
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub priority: i32,
    pub delay: i64,
    pub timeout: i32,
    pub max_retries: i32,
    pub retry_interval: i32,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay: 0,
            timeout: 60,
            max_retries: 3,
            retry_interval: 0,
        }
    }
}

/// An instance of the task engine: one per database. Multiple instances may
/// coexist in a process but must target distinct databases (see the
/// multi-process open question in the design notes).
pub struct TaskManager {
    storage: Arc<dyn StorageAdapter>,
    registry: HandlerRegistry,
    config: TaskManagerConfig,
    running: Option<Running>,
}

struct Running {
    handle: SchedulerHandle,
    pool: Arc<WorkerPool>,
}

impl TaskManager {
    /// Connect to the database named by `config.database_url` and return a
    /// manager ready for handler registration.
    pub async fn new(config: TaskManagerConfig) -> anyhow::Result<Self> {
        let db_config = DbConfig::new(config.database_url.clone());
        let storage = taskd_db::connect(&db_config).await?;
        Ok(Self {
            storage: Arc::from(storage),
            registry: HandlerRegistry::new(),
            config,
            running: None,
        })
    }

    /// Register a handler for a task name. Last registration wins; writes
    /// must happen before [`TaskManager::start`] since the registry is
    /// read-mostly once the pool is running.
    pub fn use_handler(&mut self, name: impl Into<String>, handler: impl Handler + 'static) {
        self.registry.register(name, handler);
    }

    /// Enqueue a one-shot async task. Returns the assigned id.
    pub async fn async_task(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
        opts: TaskOptions,
    ) -> Result<i64, taskd_db::StorageError> {
        let now = Utc::now().timestamp();
        let task = NewTask {
            name: name.into(),
            task_type: TaskType::Async,
            priority: opts.priority,
            payload,
            cron_expr: None,
            next_run_time: now + opts.delay,
            timeout: opts.timeout,
            max_retries: opts.max_retries,
            retry_interval: opts.retry_interval,
            created_at: now,
        };
        let id = self.storage.insert(&task).await?;
        tracing::info!(task_id = id, task_name = %task.name, "task submitted");
        Ok(id)
    }

    /// Enqueue a recurring cron task. `cron_expr` must be a valid standard
    /// 5-field expression; `opts.max_retries`/`retry_interval` are ignored
    /// since cron tasks never retry through the backoff policy — a failed
    /// run simply fires again on its own schedule.
    pub async fn cron(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
        cron_expr: impl Into<String>,
        opts: TaskOptions,
    ) -> anyhow::Result<i64> {
        let cron_expr = cron_expr.into();
        validate_cron(&cron_expr)?;

        let now = Utc::now().timestamp();
        let next_run_time = cron_next(&cron_expr, now)?;

        let task = NewTask {
            name: name.into(),
            task_type: TaskType::Cron,
            priority: opts.priority,
            payload,
            cron_expr: Some(cron_expr),
            next_run_time,
            timeout: opts.timeout,
            max_retries: 0,
            retry_interval: 0,
            created_at: now,
        };
        let id = self.storage.insert(&task).await?;
        tracing::info!(task_id = id, task_name = %task.name, next_run_time, "cron task submitted");
        Ok(id)
    }

    /// Run abandoned-task recovery, then start the poller and worker pool.
    /// Idempotent: calling `start()` while already running is a no-op.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let pool = Arc::new(WorkerPool::new(
            self.config.max_concurrent_tasks,
            Arc::new(std::mem::take(&mut self.registry)),
            Arc::clone(&self.storage),
        ));

        let scheduler = Scheduler::new(
            Arc::clone(&self.storage),
            Arc::clone(&pool),
            self.config.poll_interval_ms,
            self.config.max_concurrent_tasks,
        );
        let handle = scheduler.start().await?;

        self.running = Some(Running { handle, pool });
        tracing::info!("task manager started");
        Ok(())
    }

    /// Stop the poller and wait for in-flight tasks to finish, up to a
    /// grace window equal to the largest timeout among in-flight tasks (or
    /// 30s if none are in flight). Tasks still running when the window
    /// elapses are left `running`; they are recovered on the next `start()`.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.handle.stop().await;

        let grace = running
            .pool
            .max_in_flight_timeout()
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS));

        let deadline = tokio::time::Instant::now() + grace;
        while running.pool.in_flight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if running.pool.in_flight() > 0 {
            tracing::warn!(
                remaining = running.pool.in_flight(),
                "shutdown grace window elapsed with tasks still in flight; they will be recovered on next start()"
            );
        }

        tracing::info!("task manager stopped");
    }

    /// Operator override: force a `permanently_failed` task back to
    /// `pending`, eligible for claim immediately. Returns `false` if the
    /// task was not `permanently_failed` (e.g. already completed, still
    /// running, or unknown id).
    pub async fn retry_task(&self, id: i64) -> Result<bool, taskd_db::StorageError> {
        let now = Utc::now().timestamp();
        let requeued = self.storage.requeue(id, now).await?;
        if requeued {
            tracing::info!(task_id = id, "operator requeued permanently failed task");
        }
        Ok(requeued)
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<Task>, taskd_db::StorageError> {
        self.storage.get_by_id(id).await
    }

    pub async fn get_tasks_by_name(&self, name: &str) -> Result<Vec<Task>, taskd_db::StorageError> {
        self.storage.get_by_name(name).await
    }

    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, taskd_db::StorageError> {
        self.storage.get_by_status(status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use crate::error::HandlerError;

    async fn echo(ctx: TaskContext) -> Result<serde_json::Value, HandlerError> {
        Ok(serde_json::json!({"echoed": ctx.payload}))
    }

    #[tokio::test]
    async fn submit_and_read_back_round_trips_payload() {
        let mut mgr = TaskManager::new(TaskManagerConfig {
            database_url: "sqlite::memory:".into(),
            ..TaskManagerConfig::default()
        })
        .await
        .unwrap();
        mgr.use_handler("echo", echo);

        let payload = serde_json::json!({"data": "x"});
        let id = mgr
            .async_task("echo", payload.clone(), TaskOptions::default())
            .await
            .unwrap();

        let task = mgr.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.payload, payload);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let mut mgr = TaskManager::new(TaskManagerConfig {
            database_url: "sqlite::memory:".into(),
            poll_interval_ms: 50,
            ..TaskManagerConfig::default()
        })
        .await
        .unwrap();
        mgr.start().await.unwrap();
        mgr.start().await.unwrap();
        mgr.stop().await;
    }

    #[tokio::test]
    async fn invalid_cron_expression_fails_synchronously() {
        let mgr = TaskManager::new(TaskManagerConfig {
            database_url: "sqlite::memory:".into(),
            ..TaskManagerConfig::default()
        })
        .await
        .unwrap();

        let result = mgr
            .cron("job", serde_json::json!({}), "not a cron expr", TaskOptions::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn retry_task_is_noop_until_permanently_failed() {
        let mgr = TaskManager::new(TaskManagerConfig {
            database_url: "sqlite::memory:".into(),
            ..TaskManagerConfig::default()
        })
        .await
        .unwrap();

        let id = mgr
            .async_task("echo", serde_json::json!({}), TaskOptions::default())
            .await
            .unwrap();

        assert!(!mgr.retry_task(id).await.unwrap());
        assert_eq!(
            mgr.get_task(id).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }
}
