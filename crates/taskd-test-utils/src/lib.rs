//! Shared test infrastructure for `taskd` integration tests.
//!
//! Two kinds of fixture:
//! - [`sqlite_db`]: a throw-away SQLite database backed by a [`tempfile`]
//!   directory, for adapter-agnostic and single-process tests.
//! - [`pg_url`]/[`create_pg_test_db`]: a shared PostgreSQL instance (an
//!   external one via `TASKD_TEST_PG_URL`, or a `testcontainers` container
//!   started on first use) for exercising `SELECT ... FOR UPDATE SKIP
//!   LOCKED` concurrency that SQLite's single-connection pool can't.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use taskd_db::{DbConfig, StorageAdapter};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// An ephemeral SQLite database with the schema already created.
///
/// The `TempDir` must outlive the adapter; it deletes the backing file on
/// drop.
pub struct SqliteFixture {
    pub adapter: Box<dyn StorageAdapter>,
    _dir: tempfile::TempDir,
}

/// Create a fresh SQLite database in a temp directory and run `setup()`.
pub async fn sqlite_db() -> SqliteFixture {
    let dir = tempfile::tempdir().expect("failed to create temp dir for sqlite fixture");
    let path = dir.path().join("test.db");
    let url = format!("sqlite://{}", path.display());

    let adapter = taskd_db::connect(&DbConfig::new(url))
        .await
        .expect("failed to open sqlite test database");

    SqliteFixture {
        adapter,
        _dir: dir,
    }
}

// ---------------------------------------------------------------------------
// Shared PostgreSQL fixture
// ---------------------------------------------------------------------------

struct SharedPg {
    base_url: String,
    /// Held to keep the container alive. `None` when using an external URL.
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();
static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

async fn init_shared_pg() -> SharedPg {
    if let Ok(url) = std::env::var("TASKD_TEST_PG_URL") {
        return SharedPg {
            base_url: url,
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("18")
        .start()
        .await
        .expect("failed to start PostgreSQL container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedPg {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Base URL for the shared PostgreSQL instance (no database name appended).
///
/// Lazily starts a container on first call unless `TASKD_TEST_PG_URL` is set.
pub async fn pg_url() -> &'static str {
    let shared = SHARED_PG.get_or_init(init_shared_pg).await;
    &shared.base_url
}

/// Create a uniquely-named database in the shared PostgreSQL instance and
/// return a [`StorageAdapter`] pointed at it with the schema already created.
///
/// Call [`drop_pg_test_db`] with the same name when the test is done.
pub async fn create_pg_test_db() -> (Box<dyn StorageAdapter>, String) {
    let base_url = pg_url().await;

    let maint_url = format!("{base_url}/postgres");
    let maint_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&maint_url)
        .await
        .expect("failed to connect to maintenance database in container");

    let db_name = format!(
        "taskd_test_{}_{}",
        std::process::id(),
        DB_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    maint_pool
        .execute(format!("CREATE DATABASE {db_name}").as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create temp database {db_name}: {e}"));
    maint_pool.close().await;

    let temp_url = format!("{base_url}/{db_name}");
    let adapter = taskd_db::connect(&DbConfig::new(temp_url))
        .await
        .unwrap_or_else(|e| panic!("failed to connect to temp database {db_name}: {e}"));

    (adapter, db_name)
}

/// Drop a database created by [`create_pg_test_db`].
///
/// Terminates existing connections first; safe to call even if the database
/// was already dropped.
pub async fn drop_pg_test_db(db_name: &str) {
    let base_url = pg_url().await;
    let maint_url = format!("{base_url}/postgres");

    let Ok(maint_pool) = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&maint_url)
        .await
    else {
        return;
    };

    let terminate = format!(
        "SELECT pg_terminate_backend(pid) \
         FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = maint_pool.execute(terminate.as_str()).await;
    let _ = maint_pool
        .execute(format!("DROP DATABASE IF EXISTS {db_name}").as_str())
        .await;
    maint_pool.close().await;
}

// kept for callers that need a raw pool against the shared instance rather
// than a StorageAdapter, e.g. asserting on row-level locking directly.
pub async fn raw_pg_pool(db_name: &str) -> PgPool {
    let base_url = pg_url().await;
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&format!("{base_url}/{db_name}"))
        .await
        .expect("failed to connect raw pool to temp database")
}
