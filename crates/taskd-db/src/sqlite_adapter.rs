//! SQLite [`StorageAdapter`] implementation.
//!
//! SQLite has no `SKIP LOCKED` and serializes writers at the connection
//! level, so atomicity of `claim_ready` is instead guaranteed by a
//! process-local [`tokio::sync::Mutex`] held for the duration of the
//! select-then-update: two tasks racing `claim_ready` within the same
//! process will never observe the same row, and SQLite itself prevents a
//! second OS process from writing concurrently.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::adapter::StorageAdapter;
use crate::error::StorageError;
use crate::models::{NewTask, Task, TaskStatus, TaskType};

pub struct SqliteAdapter {
    pool: SqlitePool,
    claim_lock: Mutex<()>,
}

impl SqliteAdapter {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            claim_lock: Mutex::new(()),
        }
    }
}

fn row_to_task(row: &SqliteRow) -> Result<Task, StorageError> {
    let id: i64 = row.try_get("id")?;

    let task_type: String = row.try_get("task_type")?;
    let task_type = task_type
        .parse()
        .map_err(|_| StorageError::UnknownEngine(task_type))?;

    let status: String = row.try_get("status")?;
    let status = status
        .parse::<TaskStatus>()
        .map_err(|_| StorageError::UnknownEngine(status))?;

    let payload_text: String = row.try_get("payload")?;
    let payload = serde_json::from_str(&payload_text).map_err(|e| StorageError::Decode {
        field: "payload",
        id,
        source: e,
    })?;

    let result_text: Option<String> = row.try_get("result")?;
    let result = result_text
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| StorageError::Decode {
            field: "result",
            id,
            source: e,
        })?;

    Ok(Task {
        id,
        name: row.try_get("name")?,
        task_type,
        status,
        priority: row.try_get("priority")?,
        payload,
        cron_expr: row.try_get("cron_expr")?,
        next_run_time: row.try_get("next_run_time")?,
        last_active_time: row.try_get("last_active_time")?,
        timeout: row.try_get("timeout")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        retry_interval: row.try_get("retry_interval")?,
        created_at: row.try_get("created_at")?,
        result,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    async fn setup(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks ( \
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                name TEXT NOT NULL, \
                task_type TEXT NOT NULL, \
                status TEXT NOT NULL, \
                priority INTEGER NOT NULL DEFAULT 0, \
                payload TEXT NOT NULL, \
                cron_expr TEXT, \
                next_run_time INTEGER NOT NULL, \
                last_active_time INTEGER, \
                timeout INTEGER NOT NULL DEFAULT 60, \
                retry_count INTEGER NOT NULL DEFAULT 0, \
                max_retries INTEGER NOT NULL DEFAULT 3, \
                retry_interval INTEGER NOT NULL DEFAULT 0, \
                created_at INTEGER NOT NULL, \
                result TEXT, \
                error TEXT \
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_claim \
             ON tasks (status, priority, next_run_time)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_name ON tasks (name)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn insert(&self, task: &NewTask) -> Result<i64, StorageError> {
        let payload = serde_json::to_string(&task.payload).map_err(|e| StorageError::Decode {
            field: "payload",
            id: 0,
            source: e,
        })?;

        let result = sqlx::query(
            "INSERT INTO tasks \
                (name, task_type, status, priority, payload, cron_expr, next_run_time, \
                 timeout, retry_count, max_retries, retry_interval, created_at) \
             VALUES (?, ?, 'pending', ?, ?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(&task.name)
        .bind(task.task_type.to_string())
        .bind(task.priority)
        .bind(payload)
        .bind(&task.cron_expr)
        .bind(task.next_run_time)
        .bind(task.timeout)
        .bind(task.max_retries)
        .bind(task.retry_interval)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn claim_ready(&self, now: i64, limit: i64) -> Result<Vec<Task>, StorageError> {
        let _guard = self.claim_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let ids: Vec<i64> = sqlx::query(
            "SELECT id FROM tasks \
             WHERE status = 'pending' AND next_run_time <= ? \
             ORDER BY next_run_time ASC, priority DESC, id ASC \
             LIMIT ?",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|r| r.try_get::<i64, _>("id"))
        .collect::<Result<_, _>>()?;

        if ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let update_sql = format!(
            "UPDATE tasks SET status = 'running', last_active_time = ?, \
                 retry_count = retry_count + 1 \
             WHERE id IN ({placeholders})"
        );
        let mut update_query = sqlx::query(&update_sql).bind(now);
        for id in &ids {
            update_query = update_query.bind(id);
        }
        update_query.execute(&mut *tx).await?;

        let select_sql = format!(
            "SELECT * FROM tasks WHERE id IN ({placeholders}) \
             ORDER BY next_run_time ASC, priority DESC, id ASC"
        );
        let mut select_query = sqlx::query(&select_sql);
        for id in &ids {
            select_query = select_query.bind(id);
        }
        let rows = select_query.fetch_all(&mut *tx).await?;

        tx.commit().await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn complete(
        &self,
        id: i64,
        result: serde_json::Value,
        reschedule_at: Option<i64>,
    ) -> Result<(), StorageError> {
        let result_text = serde_json::to_string(&result).map_err(|e| StorageError::Decode {
            field: "result",
            id,
            source: e,
        })?;

        match reschedule_at {
            Some(next_run_time) => {
                sqlx::query(
                    "UPDATE tasks SET status = 'pending', result = ?, error = NULL, \
                         retry_count = 0, next_run_time = ? \
                     WHERE id = ? AND status = 'running'",
                )
                .bind(result_text)
                .bind(next_run_time)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE tasks SET status = 'completed', result = ?, error = NULL \
                     WHERE id = ? AND status = 'running'",
                )
                .bind(result_text)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn fail(
        &self,
        id: i64,
        error: &str,
        next_status: TaskStatus,
        next_run_time: i64,
        reset_retry_count: bool,
    ) -> Result<(), StorageError> {
        let sql = if reset_retry_count {
            "UPDATE tasks SET status = ?, error = ?, next_run_time = ?, retry_count = 0 \
             WHERE id = ? AND status = 'running'"
        } else {
            "UPDATE tasks SET status = ?, error = ?, next_run_time = ? \
             WHERE id = ? AND status = 'running'"
        };
        sqlx::query(sql)
            .bind(next_status.to_string())
            .bind(error)
            .bind(next_run_time)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Task>, StorageError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Vec<Task>, StorageError> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE name = ? ORDER BY id ASC")
            .bind(name)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn get_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StorageError> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = ? ORDER BY id ASC")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn reset_orphaned(&self, now: i64) -> Result<Vec<Task>, StorageError> {
        let _guard = self.claim_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let ids: Vec<i64> = sqlx::query("SELECT id FROM tasks WHERE status = 'running'")
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|r| r.try_get::<i64, _>("id"))
            .collect::<Result<_, _>>()?;

        if ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let update_sql = format!(
            "UPDATE tasks SET status = 'pending', next_run_time = ? WHERE id IN ({placeholders})"
        );
        let mut update_query = sqlx::query(&update_sql).bind(now);
        for id in &ids {
            update_query = update_query.bind(id);
        }
        update_query.execute(&mut *tx).await?;

        let select_sql = format!("SELECT * FROM tasks WHERE id IN ({placeholders})");
        let mut select_query = sqlx::query(&select_sql);
        for id in &ids {
            select_query = select_query.bind(id);
        }
        let rows = select_query.fetch_all(&mut *tx).await?;

        tx.commit().await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn requeue(&self, id: i64, now: i64) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', next_run_time = ?, retry_count = 0, error = NULL \
             WHERE id = ? AND status = 'permanently_failed'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_tasks(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM tasks").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn test_adapter() -> SqliteAdapter {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let adapter = SqliteAdapter::new(pool);
        adapter.setup().await.unwrap();
        adapter
    }

    fn sample(name: &str, priority: i32, next_run_time: i64) -> NewTask {
        NewTask {
            name: name.to_owned(),
            task_type: TaskType::Async,
            priority,
            payload: serde_json::json!({}),
            cron_expr: None,
            next_run_time,
            timeout: 60,
            max_retries: 3,
            retry_interval: 0,
            created_at: Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn insert_then_claim_marks_running() {
        let adapter = test_adapter().await;
        let now = Utc::now().timestamp();
        let id = adapter.insert(&sample("job", 0, now - 1)).await.unwrap();

        let claimed = adapter.claim_ready(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
        assert_eq!(claimed[0].status, TaskStatus::Running);

        let task = adapter.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn claim_ready_orders_by_time_then_priority_then_id() {
        let adapter = test_adapter().await;
        let now = Utc::now().timestamp();

        let low_pri_early = adapter.insert(&sample("a", 0, now - 10)).await.unwrap();
        let high_pri_same_time = adapter.insert(&sample("b", 5, now - 5)).await.unwrap();
        let low_pri_same_time = adapter.insert(&sample("c", 0, now - 5)).await.unwrap();

        let claimed = adapter.claim_ready(now, 10).await.unwrap();
        let ids: Vec<i64> = claimed.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![low_pri_early, high_pri_same_time, low_pri_same_time]);
    }

    #[tokio::test]
    async fn claim_respects_limit_and_future_schedule() {
        let adapter = test_adapter().await;
        let now = Utc::now().timestamp();
        adapter.insert(&sample("ready", 0, now - 1)).await.unwrap();
        adapter.insert(&sample("future", 0, now + 1000)).await.unwrap();

        let claimed = adapter.claim_ready(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].name, "ready");
    }

    #[tokio::test]
    async fn complete_with_reschedule_resets_retry_count() {
        let adapter = test_adapter().await;
        let now = Utc::now().timestamp();
        let id = adapter.insert(&sample("cron-job", 0, now - 1)).await.unwrap();
        adapter.claim_ready(now, 10).await.unwrap();

        adapter
            .complete(id, serde_json::json!({"ok": true}), Some(now + 60))
            .await
            .unwrap();

        let task = adapter.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.next_run_time, now + 60);
    }

    #[tokio::test]
    async fn fail_can_reach_terminal_status() {
        let adapter = test_adapter().await;
        let now = Utc::now().timestamp();
        let id = adapter.insert(&sample("job", 0, now - 1)).await.unwrap();
        adapter.claim_ready(now, 10).await.unwrap();

        adapter
            .fail(id, "boom", TaskStatus::PermanentlyFailed, now, false)
            .await
            .unwrap();

        let task = adapter.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::PermanentlyFailed);
        assert_eq!(task.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn fail_with_reset_clears_retry_count() {
        let adapter = test_adapter().await;
        let now = Utc::now().timestamp();
        let id = adapter.insert(&sample("cron-job", 0, now - 1)).await.unwrap();
        adapter.claim_ready(now, 10).await.unwrap();

        adapter
            .fail(id, "boom", TaskStatus::Pending, now + 60, true)
            .await
            .unwrap();

        let task = adapter.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
    }

    #[tokio::test]
    async fn reset_orphaned_reclaims_running_tasks() {
        let adapter = test_adapter().await;
        let now = Utc::now().timestamp();
        let id = adapter.insert(&sample("job", 0, now - 1)).await.unwrap();
        adapter.claim_ready(now, 10).await.unwrap();

        let reset = adapter.reset_orphaned(now).await.unwrap();
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].id, id);
        assert_eq!(reset[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn requeue_reopens_permanently_failed_task() {
        let adapter = test_adapter().await;
        let now = Utc::now().timestamp();
        let id = adapter.insert(&sample("job", 0, now - 1)).await.unwrap();
        adapter.claim_ready(now, 10).await.unwrap();
        adapter
            .fail(id, "boom", TaskStatus::PermanentlyFailed, now, false)
            .await
            .unwrap();

        let did_requeue = adapter.requeue(id, now + 5).await.unwrap();
        assert!(did_requeue);

        let task = adapter.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.next_run_time, now + 5);
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn requeue_is_noop_for_non_terminal_task() {
        let adapter = test_adapter().await;
        let now = Utc::now().timestamp();
        let id = adapter.insert(&sample("job", 0, now - 1)).await.unwrap();

        let did_requeue = adapter.requeue(id, now).await.unwrap();
        assert!(!did_requeue);
    }
}
