//! Submission client.
//!
//! Each call opens a fresh connection to the daemon socket, writes one
//! encoded descriptor, reads the acknowledgement and closes. The call returns
//! once the task is queued, not once it has run. There is no retry: if the
//! daemon is not there, the caller gets `ConnectFailure`.

use super::protocol::{encode, Ack, TaskDescriptor};
use crate::config::IpcConfig;
use crate::{Result, TaskError};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

/// Client for submitting tasks to a running daemon.
#[derive(Debug, Clone)]
pub struct TaskClient {
    socket_path: PathBuf,
}

impl TaskClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Submit a descriptor and wait for the daemon's acknowledgement.
    ///
    /// `Ok(Ack::Error)` means the daemon rejected the descriptor; it was not
    /// queued.
    pub async fn submit(&self, descriptor: &TaskDescriptor) -> Result<Ack> {
        let payload = encode(descriptor)?;
        let mut stream = self.connect().await?;

        stream.write_all(&payload).await?;
        // Half-close so the daemon sees EOF even if it wants more bytes.
        stream.shutdown().await?;

        let mut reply = Vec::with_capacity(16);
        tokio::time::timeout(
            IpcConfig::ACK_READ_TIMEOUT,
            (&mut stream)
                .take(IpcConfig::MAX_ACK_SIZE as u64)
                .read_to_end(&mut reply),
        )
        .await
        .map_err(|_| TaskError::Protocol {
            message: "timed out waiting for acknowledgement".to_string(),
        })??;

        let ack = Ack::parse(&reply)?;
        debug!("Submitted {}: {}", descriptor.name, ack);
        Ok(ack)
    }

    /// Submit from raw JSON parts.
    pub async fn submit_call(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Ack> {
        self.submit(&TaskDescriptor::from_parts(name, args, kwargs))
            .await
    }

    /// Blocking form of [`TaskClient::submit`] for callers without a runtime.
    ///
    /// Must not be called from inside an async context.
    pub fn submit_blocking(&self, descriptor: &TaskDescriptor) -> Result<Ack> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        runtime.block_on(self.submit(descriptor))
    }

    async fn connect(&self) -> Result<UnixStream> {
        let connect_failure = |message: String| TaskError::ConnectFailure {
            path: self.socket_path.clone(),
            message,
        };

        tokio::time::timeout(
            IpcConfig::CONNECT_TIMEOUT,
            UnixStream::connect(&self.socket_path),
        )
        .await
        .map_err(|_| connect_failure("connection timed out".to_string()))?
        .map_err(|e| connect_failure(e.to_string()))
    }
}
