//! PostgreSQL [`StorageAdapter`] implementation.
//!
//! Uses `FOR UPDATE SKIP LOCKED` inside a `WITH ... UPDATE ... RETURNING`
//! statement so that claiming ready rows is a single round trip and safe
//! across concurrent workers without an application-level lock.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::adapter::StorageAdapter;
use crate::error::StorageError;
use crate::models::{NewTask, Task, TaskStatus, TaskType};

pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_task(row: &PgRow) -> Result<Task, StorageError> {
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
impl StorageAdapter for PostgresAdapter {
    async fn setup(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks ( \
                id BIGSERIAL PRIMARY KEY, \
                name TEXT NOT NULL, \
                task_type TEXT NOT NULL, \
                status TEXT NOT NULL, \
                priority INTEGER NOT NULL DEFAULT 0, \
                payload TEXT NOT NULL, \
                cron_expr TEXT, \
                next_run_time BIGINT NOT NULL, \
                last_active_time BIGINT, \
                timeout INTEGER NOT NULL DEFAULT 60, \
                retry_count INTEGER NOT NULL DEFAULT 0, \
                max_retries INTEGER NOT NULL DEFAULT 3, \
                retry_interval INTEGER NOT NULL DEFAULT 0, \
                created_at BIGINT NOT NULL, \
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

        let row = sqlx::query(
            "INSERT INTO tasks \
                (name, task_type, status, priority, payload, cron_expr, next_run_time, \
                 timeout, retry_count, max_retries, retry_interval, created_at) \
             VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, 0, $8, $9, $10) \
             RETURNING id",
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
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn claim_ready(&self, now: i64, limit: i64) -> Result<Vec<Task>, StorageError> {
        let rows = sqlx::query(
            "WITH ready AS ( \
                SELECT id FROM tasks \
                WHERE status = 'pending' AND next_run_time <= $1 \
                ORDER BY next_run_time ASC, priority DESC, id ASC \
                LIMIT $2 \
                FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE tasks SET status = 'running', last_active_time = $1, \
                 retry_count = retry_count + 1 \
             FROM ready WHERE tasks.id = ready.id \
             RETURNING tasks.*",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // The CTE's ORDER BY does not bind to the final UPDATE ... RETURNING
        // row order, so re-sort to uphold the claim-order contract.
        let mut tasks: Vec<Task> = rows.iter().map(row_to_task).collect::<Result<_, _>>()?;
        tasks.sort_by_key(|t| (t.next_run_time, -t.priority, t.id));
        Ok(tasks)
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
                    "UPDATE tasks SET status = 'pending', result = $1, error = NULL, \
                         retry_count = 0, next_run_time = $2 \
                     WHERE id = $3 AND status = 'running'",
                )
                .bind(result_text)
                .bind(next_run_time)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE tasks SET status = 'completed', result = $1, error = NULL \
                     WHERE id = $2 AND status = 'running'",
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
            "UPDATE tasks SET status = $1, error = $2, next_run_time = $3, retry_count = 0 \
             WHERE id = $4 AND status = 'running'"
        } else {
            "UPDATE tasks SET status = $1, error = $2, next_run_time = $3 \
             WHERE id = $4 AND status = 'running'"
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
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Vec<Task>, StorageError> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE name = $1 ORDER BY id ASC")
            .bind(name)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn get_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StorageError> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = $1 ORDER BY id ASC")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn reset_orphaned(&self, now: i64) -> Result<Vec<Task>, StorageError> {
        let rows = sqlx::query(
            "UPDATE tasks SET status = 'pending', next_run_time = $1 \
             WHERE status = 'running' RETURNING *",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    async fn requeue(&self, id: i64, now: i64) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', next_run_time = $1, retry_count = 0, error = NULL \
             WHERE id = $2 AND status = 'permanently_failed'",
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
