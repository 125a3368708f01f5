use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------

/// Status of a task.
///
/// `paused` is reserved for a future manual-pause feature; the scheduler
/// treats it the same as "not eligible for claim" and nothing in the core
/// transitions a task into it today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    PermanentlyFailed,
    Paused,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PermanentlyFailed => "permanently_failed",
            Self::Paused => "paused",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "permanently_failed" => Ok(Self::PermanentlyFailed),
            "paused" => Ok(Self::Paused),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// The kind of task: one-shot `async`, or recurring `cron`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Async,
    Cron,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Async => "async",
            Self::Cron => "cron",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = TaskTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "async" => Ok(Self::Async),
            "cron" => Ok(Self::Cron),
            other => Err(TaskTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskType`] string.
#[derive(Debug, Clone)]
pub struct TaskTypeParseError(pub String);

impl fmt::Display for TaskTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task type: {:?}", self.0)
    }
}

impl std::error::Error for TaskTypeParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A task -- the unit of durable, scheduled work.
///
/// Mirrors the `tasks` table exactly; `payload`, `result`, and `error` are
/// stored as text blobs in the database and decoded into structured values
/// here by the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub cron_expr: Option<String>,
    pub next_run_time: i64,
    pub last_active_time: Option<i64>,
    pub timeout: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub retry_interval: i32,
    pub created_at: i64,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Options accepted by [`crate::adapter::StorageAdapter::insert`], shared by
/// both the `async()` and `cron()` public API entry points.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub task_type: TaskType,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub cron_expr: Option<String>,
    pub next_run_time: i64,
    pub timeout: i32,
    pub max_retries: i32,
    pub retry_interval: i32,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::PermanentlyFailed,
            TaskStatus::Paused,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("nope".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_type_display_roundtrip() {
        for v in [TaskType::Async, TaskType::Cron] {
            let s = v.to_string();
            let parsed: TaskType = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn task_type_invalid() {
        assert!("periodic".parse::<TaskType>().is_err());
    }
}
