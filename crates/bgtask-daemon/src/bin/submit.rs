//! bgtask-submit - queue one task on a running daemon.
//!
//! ```text
//! bgtask-submit builtin.log '"hello"' 42 --kwarg level='"warn"'
//! ```
//!
//! Each positional argument and each `--kwarg` value is parsed as JSON; text
//! that is not valid JSON is sent as a plain string. Prints the daemon's
//! acknowledgement and exits non-zero if the task was not queued.

use anyhow::{bail, Context, Result};
use bgtask_core::{Ack, TaskClient, TaskDescriptor};
use clap::Parser;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "bgtask-submit")]
#[command(about = "Submit a task to a running bgtask daemon")]
struct Args {
    /// Unix socket path of the daemon
    #[arg(short, long, env = "BGTASK_SOCKET")]
    socket: Option<PathBuf>,

    /// Dotted task name, e.g. builtin.log
    name: String,

    /// Positional arguments (JSON, or plain strings)
    args: Vec<String>,

    /// Keyword argument as KEY=VALUE (VALUE is JSON, or a plain string)
    #[arg(short, long = "kwarg", value_name = "KEY=VALUE")]
    kwargs: Vec<String>,
}

impl Args {
    fn descriptor(&self) -> Result<TaskDescriptor> {
        let args = self.args.iter().map(|raw| parse_value(raw)).collect();
        let mut kwargs = Map::new();
        for raw in &self.kwargs {
            let (key, value) = parse_kwarg(raw)?;
            kwargs.insert(key, value);
        }
        Ok(TaskDescriptor::from_parts(self.name.clone(), args, kwargs))
    }

    fn socket_path(&self) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(|| bgtask_core::DaemonConfig::default().socket_path)
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_kwarg(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("keyword argument {:?} is not KEY=VALUE", raw))?;
    if key.is_empty() {
        bail!("keyword argument {:?} has an empty key", raw);
    }
    Ok((key.to_string(), parse_value(value)))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let descriptor = args.descriptor()?;
    let client = TaskClient::new(args.socket_path());
    let ack = client.submit(&descriptor).await?;

    println!("{}", ack);
    if ack == Ack::Error {
        bail!("daemon rejected task {:?}", descriptor.name);
    }
    Ok(())
}
