//! Unix socket ingress listener.
//!
//! Binds the configured socket path and accepts one submission per
//! connection. Each connection is handled in its own spawned task: read one
//! descriptor, push it onto the [`WorkQueue`], write `Queued`, close. Anything
//! that fails to decode gets `ERROR` and is never enqueued.
//!
//! # Thread Safety
//!
//! The accept loop owns the listener. Connection tasks share only the queue,
//! whose `enqueue` is non-blocking, so a handler never waits on a worker.

use super::protocol::{decode, read_payload, Ack};
use crate::config::IpcConfig;
use crate::queue::WorkQueue;
use crate::{Result, TaskError};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Handle to a running listener. Dropping it stops accepting and removes
/// the socket file, unless something else has replaced it since.
pub struct TaskServerHandle {
    path: PathBuf,
    socket_id: Option<(u64, u64)>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TaskServerHandle {
    /// Path of the bound socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting new connections. Connections already accepted finish
    /// their exchange.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TaskServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
        if self.socket_id.is_none() || socket_identity(&self.path) != self.socket_id {
            debug!("Socket {} no longer ours, leaving it", self.path.display());
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove socket {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Device and inode of the socket at `path`, if there is one.
fn socket_identity(path: &Path) -> Option<(u64, u64)> {
    let metadata = std::fs::symlink_metadata(path).ok()?;
    metadata
        .file_type()
        .is_socket()
        .then(|| (metadata.dev(), metadata.ino()))
}

/// Ingress listener that feeds the work queue.
pub struct TaskServer;

impl TaskServer {
    /// Bind `path` and start accepting submissions in the background.
    ///
    /// A stale socket left by a previous run is removed first. Fails if a
    /// live listener still answers on `path`, or if `path` exists and is not
    /// a socket. The parent directory must already exist.
    pub async fn bind(path: impl AsRef<Path>, queue: Arc<WorkQueue>) -> Result<TaskServerHandle> {
        let path = path.as_ref().to_path_buf();

        Self::clear_stale_socket(&path).await?;

        let listener = UnixListener::bind(&path).map_err(|e| TaskError::io_with_path(e, &path))?;
        let socket_id = socket_identity(&path);

        info!("Listening for tasks on {}", path.display());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task_handle = tokio::spawn(Self::accept_loop(listener, queue, shutdown_rx));

        Ok(TaskServerHandle {
            path,
            socket_id,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }

    async fn clear_stale_socket(path: &Path) -> Result<()> {
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(TaskError::io_with_path(e, path)),
        };

        if !metadata.file_type().is_socket() {
            return Err(TaskError::Config {
                message: format!("{} exists and is not a socket", path.display()),
            });
        }

        let live =
            tokio::time::timeout(IpcConfig::CONNECT_TIMEOUT, UnixStream::connect(path)).await;
        if let Ok(Ok(_)) = live {
            return Err(TaskError::Config {
                message: format!("{} is in use by a running daemon", path.display()),
            });
        }

        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed stale socket {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TaskError::io_with_path(e, path)),
        }
    }

    async fn accept_loop(
        listener: UnixListener,
        queue: Arc<WorkQueue>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Task listener shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let queue = queue.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, &queue).await {
                                    debug!("Task connection ended: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Task listener accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(mut stream: UnixStream, queue: &WorkQueue) -> Result<()> {
        let ack = match Self::read_descriptor(&mut stream).await {
            Ok(descriptor) => {
                info!("Enqueued {}", descriptor.name);
                queue.enqueue(descriptor);
                Ack::Queued
            }
            Err(e) => {
                warn!("Rejected task submission: {}", e);
                Ack::Error
            }
        };

        stream.write_all(ack.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn read_descriptor(stream: &mut UnixStream) -> Result<super::TaskDescriptor> {
        let payload = tokio::time::timeout(
            IpcConfig::REQUEST_READ_TIMEOUT,
            read_payload(stream, IpcConfig::MAX_REQUEST_SIZE),
        )
        .await
        .map_err(|_| TaskError::malformed("timed out waiting for request"))??;

        decode(&payload)
    }
}
