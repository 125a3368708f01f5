//! MySQL [`StorageAdapter`] implementation.
//!
//! MySQL supports `SELECT ... FOR UPDATE SKIP LOCKED` but, unlike Postgres,
//! has no `UPDATE ... RETURNING`. Claiming is therefore a three-step dance
//! inside one transaction: select the candidate ids under `SKIP LOCKED`,
//! update them by id, then re-select the now-`running` rows. The row lock
//! held across the two statements keeps the claim atomic with respect to
//! other concurrent claimers.

use async_trait::async_trait;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

use crate::adapter::StorageAdapter;
use crate::error::StorageError;
use crate::models::{NewTask, Task, TaskStatus, TaskType};

pub struct MySqlAdapter {
    pool: MySqlPool,
}

impl MySqlAdapter {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn row_to_task(row: &MySqlRow) -> Result<Task, StorageError> {
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
impl StorageAdapter for MySqlAdapter {
    async fn setup(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks ( \
                id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY, \
                name VARCHAR(255) NOT NULL, \
                task_type VARCHAR(16) NOT NULL, \
                status VARCHAR(32) NOT NULL, \
                priority INT NOT NULL DEFAULT 0, \
                payload LONGTEXT NOT NULL, \
                cron_expr VARCHAR(255), \
                next_run_time BIGINT NOT NULL, \
                last_active_time BIGINT, \
                timeout INT NOT NULL DEFAULT 60, \
                retry_count INT NOT NULL DEFAULT 0, \
                max_retries INT NOT NULL DEFAULT 3, \
                retry_interval INT NOT NULL DEFAULT 0, \
                created_at BIGINT NOT NULL, \
                result LONGTEXT, \
                error LONGTEXT, \
                INDEX idx_tasks_claim (status, priority, next_run_time), \
                INDEX idx_tasks_name (name) \
            )",
        )
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

        Ok(result.last_insert_id() as i64)
    }

    async fn claim_ready(&self, now: i64, limit: i64) -> Result<Vec<Task>, StorageError> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<i64> = sqlx::query(
            "SELECT id FROM tasks \
             WHERE status = 'pending' AND next_run_time <= ? \
             ORDER BY next_run_time ASC, priority DESC, id ASC \
             LIMIT ? FOR UPDATE SKIP LOCKED",
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
