//! Task manager configuration.
//!
//! Resolution order: explicit constructor argument > environment variable >
//! compiled-in default, matching the rest of this codebase's config
//! precedent (see `taskd_db::DbConfig`).

use std::env;

use taskd_db::DbConfig;

/// Runtime configuration for a [`crate::manager::TaskManager`].
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    pub database_url: String,
    pub poll_interval_ms: u64,
    pub max_concurrent_tasks: usize,
    pub max_retries: i32,
    pub retry_interval: i32,
}

impl TaskManagerConfig {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
    pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 5;
    pub const DEFAULT_MAX_RETRIES: i32 = 3;
    pub const DEFAULT_RETRY_INTERVAL: i32 = 0;

    /// Resolve configuration from the environment, falling back to
    /// documented defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            database_url: DbConfig::from_env().database_url,
            poll_interval_ms: env_u64("TASKD_POLL_INTERVAL_MS", Self::DEFAULT_POLL_INTERVAL_MS),
            max_concurrent_tasks: env_usize(
                "TASKD_MAX_CONCURRENT_TASKS",
                Self::DEFAULT_MAX_CONCURRENT_TASKS,
            ),
            max_retries: env_i32("TASKD_MAX_RETRIES", Self::DEFAULT_MAX_RETRIES),
            retry_interval: env_i32("TASKD_RETRY_INTERVAL", Self::DEFAULT_RETRY_INTERVAL),
        }
    }
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            database_url: DbConfig::DEFAULT_URL.to_owned(),
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_tasks: Self::DEFAULT_MAX_CONCURRENT_TASKS,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            retry_interval: Self::DEFAULT_RETRY_INTERVAL,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = TaskManagerConfig::default();
        assert_eq!(cfg.poll_interval_ms, 1000);
        assert_eq!(cfg.max_concurrent_tasks, 5);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_interval, 0);
    }
}
