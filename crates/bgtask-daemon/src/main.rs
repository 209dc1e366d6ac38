//! bgtaskd - background task daemon.
//!
//! Starts the socket listener and the worker pool together and runs until
//! interrupted. Once the socket is bound the daemon prints
//! `BGTASK_SOCKET=<path>` on stdout so a supervising process knows it is
//! ready; all logging goes to stderr.

mod builtin;

use anyhow::{Context, Result};
use bgtask_core::{DaemonConfig, PoolConfig, TaskDaemon};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "bgtaskd")]
#[command(about = "Run queued background tasks submitted over a local socket")]
struct Args {
    /// Unix socket path to listen on
    #[arg(short, long, env = "BGTASK_SOCKET")]
    socket: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(short, long, env = "BGTASK_WORKERS", default_value_t = PoolConfig::DEFAULT_WORKERS)]
    workers: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn daemon_config(&self) -> DaemonConfig {
        let config = match &self.socket {
            Some(path) => DaemonConfig::new(path),
            None => DaemonConfig::default(),
        };
        config.with_workers(self.workers)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --debug when set
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting bgtask daemon");

    let config = args.daemon_config();
    let registry = builtin::registry().context("failed to register built-in tasks")?;
    info!("Serving tasks: {}", registry.names().join(", "));

    let mut daemon = TaskDaemon::start(config, Arc::new(registry))
        .await
        .context("failed to start task daemon")?;

    // Print socket path for a supervising process (intentional stdout)
    println!("BGTASK_SOCKET={}", daemon.socket_path().display());

    wait_for_shutdown_signal().await?;
    info!("Shutdown signal received, exiting");
    daemon.shutdown();

    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["bgtaskd"]).unwrap();
        let config = args.daemon_config();
        assert_eq!(config.workers, PoolConfig::DEFAULT_WORKERS);
        assert!(!args.debug);
    }

    #[test]
    fn test_flags() {
        let args =
            Args::try_parse_from(["bgtaskd", "--socket", "/tmp/x.sock", "-w", "8", "--debug"])
                .unwrap();
        let config = args.daemon_config();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/x.sock"));
        assert_eq!(config.workers, 8);
        assert!(args.debug);
    }

    #[test]
    fn test_rejects_non_numeric_workers() {
        assert!(Args::try_parse_from(["bgtaskd", "--workers", "many"]).is_err());
    }
}
