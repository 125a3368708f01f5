//! Built-in handlers registered by `taskd run`.
//!
//! The core engine is handler-agnostic; a real deployment embeds
//! [`taskd_core::TaskManager`] in its own binary and registers its own
//! handlers before calling `start()`. The standalone `taskd run` command has
//! no such embedding application, so it registers a small set of generic
//! handlers that make `submit`/`cron` against the CLI directly useful for
//! smoke-testing a deployment and for ad hoc scheduled shell work.

use taskd_core::{HandlerError, TaskContext, TaskManager};

pub fn register_demo_handlers(mgr: &mut TaskManager) {
    mgr.use_handler("echo", echo);
    mgr.use_handler("sleep", sleep);
    mgr.use_handler("fail", fail);
}

/// Returns the payload unchanged, wrapped in `{"echoed": ...}`.
async fn echo(ctx: TaskContext) -> Result<serde_json::Value, HandlerError> {
    Ok(serde_json::json!({ "echoed": ctx.payload }))
}

/// Sleeps for `payload.seconds` (default 1), checking the deadline first.
///
/// Demonstrates cooperative cancellation: a `sleep` task submitted with a
/// shorter `--timeout` than its requested duration fails with a timeout
/// error instead of running to completion.
async fn sleep(ctx: TaskContext) -> Result<serde_json::Value, HandlerError> {
    ctx.check_timeout()?;
    let seconds = ctx
        .payload
        .get("seconds")
        .and_then(|v| v.as_u64())
        .unwrap_or(1);
    tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
    ctx.check_timeout()?;
    Ok(serde_json::json!({ "slept_seconds": seconds }))
}

/// Always fails, with `payload.message` (default "forced failure") as the
/// error text. Useful for exercising the retry policy and `taskd retry`.
async fn fail(ctx: TaskContext) -> Result<serde_json::Value, HandlerError> {
    let message = ctx
        .payload
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("forced failure")
        .to_string();
    Err(HandlerError::new(message))
}
