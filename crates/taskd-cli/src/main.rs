mod config;
mod handlers;
mod status_cmd;

use std::io::Read;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use config::ResolvedConfig;
use taskd_core::{TaskManager, TaskOptions};
use taskd_db::{DbConfig, TaskStatus};

#[derive(Parser)]
#[command(name = "taskd", about = "Durable, multi-worker task manager")]
struct Cli {
    /// Database URL (overrides TASKD_DATABASE_URL env var and the config file)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a taskd config file (no database required)
    Init {
        /// Database connection URL
        #[arg(long, default_value = "sqlite://taskd.db")]
        db_url: String,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the `tasks` table (idempotent)
    DbInit,
    /// Enqueue a one-shot async task
    Submit {
        /// Handler name to dispatch to
        name: String,
        /// JSON payload; reads stdin if omitted
        payload: Option<String>,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Delay before the task becomes eligible, in seconds
        #[arg(long, default_value_t = 0)]
        delay: i64,
        #[arg(long, default_value_t = 60)]
        timeout: i32,
        #[arg(long, default_value_t = 3)]
        max_retries: i32,
        #[arg(long, default_value_t = 0)]
        retry_interval: i32,
    },
    /// Enqueue a recurring cron task
    Cron {
        /// Handler name to dispatch to
        name: String,
        /// Standard 5-field cron expression, e.g. "*/5 * * * *"
        cron_expr: String,
        /// JSON payload; reads stdin if omitted
        payload: Option<String>,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long, default_value_t = 60)]
        timeout: i32,
    },
    /// Start the worker loop and block until interrupted (Ctrl-C)
    Run,
    /// Show all tasks, or tasks matching a status filter
    Status {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show a single task's full record
    Show {
        id: i64,
    },
    /// List tasks, optionally filtered by status or handler name
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Force a permanently-failed task back to pending
    Retry {
        id: i64,
    },
}

fn parse_status(s: &str) -> Result<TaskStatus> {
    s.parse()
        .map_err(|_| anyhow::anyhow!("unknown status {s:?} (expected one of: pending, running, completed, permanently_failed, paused)"))
}

fn read_payload(payload: Option<String>) -> Result<serde_json::Value> {
    let text = match payload {
        Some(p) => p,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read payload from stdin")?;
            buf
        }
    };
    serde_json::from_str(&text).with_context(|| format!("invalid JSON payload: {text:?}"))
}

fn cmd_init(db_url: &str, force: bool) -> Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        engine: config::EngineSection::default(),
    };
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `taskd db-init` to create the tasks table.");
    Ok(())
}

async fn cmd_db_init(resolved: &ResolvedConfig) -> Result<()> {
    let db_config = DbConfig::new(resolved.database_url.clone());
    let adapter = taskd_db::connect(&db_config).await?;
    adapter.setup().await.context("failed to create schema")?;
    println!("Schema ready at {}", resolved.database_url);
    Ok(())
}

async fn cmd_run(resolved: ResolvedConfig) -> Result<()> {
    let mut mgr = TaskManager::new(resolved.into_manager_config()).await?;
    handlers::register_demo_handlers(&mut mgr);

    mgr.start().await.context("failed to start task manager")?;
    println!("taskd worker loop started. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    println!("shutting down...");
    mgr.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            let resolved = ResolvedConfig::resolve(cli.database_url.as_deref());
            cmd_db_init(&resolved).await?;
        }
        Commands::Submit {
            name,
            payload,
            priority,
            delay,
            timeout,
            max_retries,
            retry_interval,
        } => {
            let resolved = ResolvedConfig::resolve(cli.database_url.as_deref());
            let mgr = TaskManager::new(resolved.into_manager_config()).await?;
            let payload = read_payload(payload)?;
            let id = mgr
                .async_task(
                    &name,
                    payload,
                    TaskOptions {
                        priority,
                        delay,
                        timeout,
                        max_retries,
                        retry_interval,
                    },
                )
                .await?;
            println!("Submitted task {id} ({name})");
        }
        Commands::Cron {
            name,
            cron_expr,
            payload,
            priority,
            timeout,
        } => {
            let resolved = ResolvedConfig::resolve(cli.database_url.as_deref());
            let mgr = TaskManager::new(resolved.into_manager_config()).await?;
            let payload = read_payload(payload)?;
            let id = mgr
                .cron(
                    &name,
                    payload,
                    &cron_expr,
                    TaskOptions {
                        priority,
                        timeout,
                        ..TaskOptions::default()
                    },
                )
                .await?;
            println!("Submitted cron task {id} ({name} @ {cron_expr})");
        }
        Commands::Run => {
            let resolved = ResolvedConfig::resolve(cli.database_url.as_deref());
            cmd_run(resolved).await?;
        }
        Commands::Status { status } => {
            let resolved = ResolvedConfig::resolve(cli.database_url.as_deref());
            let mgr = TaskManager::new(resolved.into_manager_config()).await?;
            let status = status.as_deref().map(parse_status).transpose()?;
            status_cmd::run_list(&mgr, status, None).await?;
        }
        Commands::Show { id } => {
            let resolved = ResolvedConfig::resolve(cli.database_url.as_deref());
            let mgr = TaskManager::new(resolved.into_manager_config()).await?;
            status_cmd::run_show(&mgr, id).await?;
        }
        Commands::List { status, name } => {
            let resolved = ResolvedConfig::resolve(cli.database_url.as_deref());
            let mgr = TaskManager::new(resolved.into_manager_config()).await?;
            let status = status.as_deref().map(parse_status).transpose()?;
            status_cmd::run_list(&mgr, status, name.as_deref()).await?;
        }
        Commands::Retry { id } => {
            let resolved = ResolvedConfig::resolve(cli.database_url.as_deref());
            let mgr = TaskManager::new(resolved.into_manager_config()).await?;
            if mgr.retry_task(id).await? {
                println!("Task {id} reset to pending for retry.");
            } else {
                bail!("task {id} is not permanently failed (or does not exist); nothing to retry");
            }
        }
    }

    Ok(())
}
