//! Daemon assembly: one queue, one listener, one worker pool.
//!
//! The three are created together and live as long as the returned
//! [`DaemonHandle`]. There is no drain on shutdown; queued descriptors that
//! no worker has picked up are discarded.

use crate::config::DaemonConfig;
use crate::ipc::{TaskServer, TaskServerHandle};
use crate::queue::WorkQueue;
use crate::resolver::CallableResolver;
use crate::worker::{PoolStats, WorkerPool, WorkerPoolHandle};
use crate::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Entry point for running a task daemon inside a tokio runtime.
pub struct TaskDaemon;

impl TaskDaemon {
    /// Validate `config`, bind the socket and start the workers.
    pub async fn start(
        config: DaemonConfig,
        resolver: Arc<dyn CallableResolver>,
    ) -> Result<DaemonHandle> {
        config.validate()?;

        let queue = Arc::new(WorkQueue::new());
        let server = TaskServer::bind(config.socket_path(), queue.clone()).await?;
        let pool = WorkerPool::new(queue.clone(), resolver, config.workers).start()?;

        info!(
            "Task daemon running on {} with {} workers",
            config.socket_path().display(),
            config.workers
        );

        Ok(DaemonHandle {
            queue,
            server,
            pool,
        })
    }
}

/// Running daemon. Dropping it stops the listener and the workers.
pub struct DaemonHandle {
    queue: Arc<WorkQueue>,
    server: TaskServerHandle,
    pool: WorkerPoolHandle,
}

impl DaemonHandle {
    pub fn socket_path(&self) -> &Path {
        self.server.path()
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn pool(&self) -> &WorkerPoolHandle {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop accepting submissions and abort the workers.
    pub fn shutdown(&mut self) {
        info!(
            "Stopping task daemon ({} queued tasks dropped)",
            self.queue.pending()
        );
        self.server.shutdown();
        self.pool.shutdown();
    }
}
