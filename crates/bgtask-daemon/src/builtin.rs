//! Tasks bundled with the stock daemon binary.
//!
//! Applications embedding `bgtask-core` register their own tasks; these exist
//! so `bgtaskd` is usable and testable on its own.

use anyhow::Result;
use bgtask_core::{TaskArgs, TaskRegistry};
use std::time::Duration;
use tracing::info;

/// Build the registry served by `bgtaskd`.
pub fn registry() -> bgtask_core::Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();

    registry.register_async("builtin.log", |args: TaskArgs| async move { log(args) })?;
    registry.register_blocking("builtin.sleep", sleep)?;
    registry.register_async("builtin.fail", |args: TaskArgs| async move { fail(args) })?;
    registry.register_value(
        "builtin.version",
        serde_json::Value::String(env!("CARGO_PKG_VERSION").to_string()),
    )?;

    Ok(registry)
}

/// Log the arguments it was called with.
fn log(args: TaskArgs) -> Result<()> {
    info!(
        "builtin.log args={} kwargs={}",
        serde_json::Value::Array(args.args),
        serde_json::Value::Object(args.kwargs)
    );
    Ok(())
}

/// Block the calling thread for `seconds` (first positional argument).
fn sleep(args: TaskArgs) -> Result<()> {
    let seconds: f64 = args.arg(0)?;
    if !seconds.is_finite() || seconds < 0.0 {
        anyhow::bail!("sleep duration must be a non-negative number, got {}", seconds);
    }
    std::thread::sleep(Duration::from_secs_f64(seconds));
    info!("builtin.sleep slept {}s", seconds);
    Ok(())
}

/// Fail on purpose, with an optional `message` keyword argument.
fn fail(args: TaskArgs) -> Result<()> {
    let message: String = args.kwarg_or("message", "requested failure".to_string())?;
    anyhow::bail!(message)
}
