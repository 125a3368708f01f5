//! Scheduler/poller: the loop that claims ready tasks and hands them to the
//! worker pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskd_db::StorageAdapter;
use tokio::sync::watch;

use crate::worker::WorkerPool;

/// Handle returned by [`Scheduler::start`]; dropping it does not stop the
/// loop — call [`SchedulerHandle::stop`] explicitly.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the poll loop to stop and wait for it to exit. Does not wait
    /// for in-flight tasks; callers that need a drain should consult
    /// [`WorkerPool::in_flight`] afterward (see [`crate::manager::TaskManager::stop`]).
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
    }
}

pub struct Scheduler {
    storage: Arc<dyn StorageAdapter>,
    pool: Arc<WorkerPool>,
    poll_interval: Duration,
    max_concurrent_tasks: usize,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        pool: Arc<WorkerPool>,
        poll_interval_ms: u64,
        max_concurrent_tasks: usize,
    ) -> Self {
        Self {
            storage,
            pool,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_concurrent_tasks,
        }
    }

    /// Run abandoned-task recovery, then spawn the poll loop.
    ///
    /// Any task left `running` from a prior process (crash, kill -9) is
    /// reset to `pending` with `next_run_time = now`; its `retry_count` is
    /// left as-is, since the prior attempt counts.
    pub async fn start(self) -> Result<SchedulerHandle, taskd_db::StorageError> {
        let now = Utc::now().timestamp();
        let orphaned = self.storage.reset_orphaned(now).await?;
        for task in &orphaned {
            tracing::warn!(task_id = task.id, task_name = %task.name, "reset orphaned task to pending");
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let storage = Arc::clone(&self.storage);
        let pool = Arc::clone(&self.pool);
        let poll_interval = self.poll_interval;
        let max_concurrent_tasks = self.max_concurrent_tasks;

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            tracing::info!("scheduler stopping");
                            break;
                        }
                    }
                }

                let in_flight = pool.in_flight();
                let free = max_concurrent_tasks.saturating_sub(in_flight);
                if free == 0 {
                    continue;
                }

                let now = Utc::now().timestamp();
                match storage.claim_ready(now, free as i64).await {
                    Ok(tasks) => {
                        for task in tasks {
                            tracing::info!(task_id = task.id, task_name = %task.name, "claimed task");
                            pool.spawn(task);
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to claim ready tasks, skipping poll tick");
                    }
                }
            }
        });

        Ok(SchedulerHandle { stop_tx, join })
    }
}
