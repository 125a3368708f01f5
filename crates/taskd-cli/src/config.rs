//! Configuration file management for the `taskd` CLI.
//!
//! Provides a TOML-based config file at `~/.config/taskd/config.toml` and a
//! resolution chain: CLI flag > env var > config file > compiled-in default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use taskd_db::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub engine: EngineSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineSection {
    pub poll_interval_ms: u64,
    pub max_concurrent_tasks: usize,
    pub max_retries: i32,
    pub retry_interval: i32,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: taskd_core::TaskManagerConfig::DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_tasks: taskd_core::TaskManagerConfig::DEFAULT_MAX_CONCURRENT_TASKS,
            max_retries: taskd_core::TaskManagerConfig::DEFAULT_MAX_RETRIES,
            retry_interval: taskd_core::TaskManagerConfig::DEFAULT_RETRY_INTERVAL,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the taskd config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/taskd` or `~/.config/taskd`. We
/// intentionally ignore the platform-specific `dirs::config_dir()` (which
/// returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("taskd");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("taskd")
}

/// Return the path to the taskd config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use by the engine.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub database_url: String,
    pub poll_interval_ms: u64,
    pub max_concurrent_tasks: usize,
    pub max_retries: i32,
    pub retry_interval: i32,
}

impl ResolvedConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// DB URL: `cli_db_url` > `TASKD_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`.
    /// Engine knobs come from the config file when present, otherwise compiled-in defaults.
    pub fn resolve(cli_db_url: Option<&str>) -> Self {
        let file_config = load_config().ok();

        let database_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("TASKD_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let engine = file_config.map(|c| c.engine).unwrap_or_default();

        Self {
            database_url,
            poll_interval_ms: engine.poll_interval_ms,
            max_concurrent_tasks: engine.max_concurrent_tasks,
            max_retries: engine.max_retries,
            retry_interval: engine.retry_interval,
        }
    }

    pub fn into_manager_config(self) -> taskd_core::TaskManagerConfig {
        taskd_core::TaskManagerConfig {
            database_url: self.database_url,
            poll_interval_ms: self.poll_interval_ms,
            max_concurrent_tasks: self.max_concurrent_tasks,
            max_retries: self.max_retries,
            retry_interval: self.retry_interval,
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("taskd/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }

    #[test]
    fn engine_section_default_matches_manager_defaults() {
        let engine = EngineSection::default();
        assert_eq!(engine.poll_interval_ms, 1000);
        assert_eq!(engine.max_concurrent_tasks, 5);
        assert_eq!(engine.max_retries, 3);
        assert_eq!(engine.retry_interval, 0);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_env_and_file() {
        let resolved = ResolvedConfig::resolve(Some("sqlite://cli-wins.db"));
        assert_eq!(resolved.database_url, "sqlite://cli-wins.db");
    }

    #[test]
    fn config_file_roundtrips_through_toml() {
        let original = ConfigFile {
            database: DatabaseSection {
                url: "sqlite://roundtrip.db".to_string(),
            },
            engine: EngineSection::default(),
        };
        let contents = toml::to_string_pretty(&original).unwrap();
        let loaded: ConfigFile = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.engine.max_concurrent_tasks, original.engine.max_concurrent_tasks);
    }
}
