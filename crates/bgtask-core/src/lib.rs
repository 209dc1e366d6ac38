//! bgtask core - local background-task dispatch.
//!
//! A daemon accepts task descriptors over a Unix domain socket, queues them in
//! memory and runs them on a fixed pool of workers. Foreground code hands off
//! slow or fire-and-forget work with [`TaskClient`] and gets an
//! acknowledgement as soon as the task is queued.
//!
//! # Example
//!
//! ```rust,ignore
//! use bgtask_core::{DaemonConfig, TaskArgs, TaskClient, TaskDaemon, TaskDescriptor, TaskRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> bgtask_core::Result<()> {
//!     let mut registry = TaskRegistry::new();
//!     registry.register_blocking("mail.send", |args: TaskArgs| {
//!         let to: String = args.arg(0)?;
//!         println!("sending to {}", to);
//!         Ok(())
//!     })?;
//!
//!     let config = DaemonConfig::new("/tmp/bgtask.sock");
//!     let _daemon = TaskDaemon::start(config, Arc::new(registry)).await?;
//!
//!     let client = TaskClient::new("/tmp/bgtask.sock");
//!     client.submit(&TaskDescriptor::new("mail.send").arg("a@example.com")?).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod queue;
pub mod resolver;
pub mod worker;

pub use config::{DaemonConfig, IpcConfig, PoolConfig};
pub use daemon::{DaemonHandle, TaskDaemon};
pub use error::{ResolveError, Result, TaskError};
pub use ipc::{Ack, TaskClient, TaskDescriptor, TaskServer, TaskServerHandle};
pub use queue::WorkQueue;
pub use resolver::{Callable, CallableResolver, TaskArgs, TaskRegistry};
pub use worker::{PoolStats, WorkerPool, WorkerPoolHandle, WorkerState};
