//! Pool construction and database bootstrap, one branch per supported
//! engine.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use crate::adapter::StorageAdapter;
use crate::config::{DbConfig, Engine};
use crate::mysql_adapter::MySqlAdapter;
use crate::postgres_adapter::PostgresAdapter;
use crate::sqlite_adapter::SqliteAdapter;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to the database named by `config` and return a [`StorageAdapter`]
/// for whichever engine its URL scheme selects.
///
/// The returned adapter's schema has already been created (idempotently);
/// callers do not need to call [`StorageAdapter::setup`] themselves.
pub async fn connect(config: &DbConfig) -> Result<Box<dyn StorageAdapter>> {
    let adapter: Box<dyn StorageAdapter> = match config.engine()? {
        Engine::Sqlite => {
            let opts = SqliteConnectOptions::from_str(&config.database_url)
                .with_context(|| format!("invalid sqlite URL {}", config.database_url))?
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect_with(opts)
                .await
                .with_context(|| {
                    format!("failed to open sqlite database at {}", config.database_url)
                })?;
            Box::new(SqliteAdapter::new(pool))
        }
        Engine::MySql => {
            let pool = MySqlPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect(&config.database_url)
                .await
                .with_context(|| {
                    format!("failed to connect to mysql at {}", config.database_url)
                })?;
            Box::new(MySqlAdapter::new(pool))
        }
        Engine::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect(&config.database_url)
                .await
                .with_context(|| {
                    format!("failed to connect to postgres at {}", config.database_url)
                })?;
            Box::new(PostgresAdapter::new(pool))
        }
    };

    adapter.setup().await.context("failed to initialize schema")?;
    info!(engine = %config.engine()?, "connected to task store");
    Ok(adapter)
}
