//! Centralized configuration for bgtask.
//!
//! Wire limits and pool defaults are compile-time constants. The values an
//! operator chooses (socket path, worker count) travel in [`DaemonConfig`],
//! which is handed explicitly to the daemon at startup.

use crate::{Result, TaskError};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local socket protocol limits.
pub struct IpcConfig;

impl IpcConfig {
    /// Largest request payload the listener will read from one connection.
    pub const MAX_REQUEST_SIZE: usize = 65_536;
    /// Largest acknowledgement the client will read back.
    pub const MAX_ACK_SIZE: usize = 600;
    pub const READ_CHUNK_SIZE: usize = 4096;
    /// A connection that has not delivered a full request by then is rejected.
    pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const ACK_READ_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_SOCKET_NAME: &'static str = "bgtask.sock";
}

/// Worker pool defaults.
pub struct PoolConfig;

impl PoolConfig {
    pub const DEFAULT_WORKERS: usize = 4;
    pub const MAX_WORKERS: usize = 256;
}

/// Runtime configuration for a daemon instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub workers: usize,
}

impl DaemonConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            workers: PoolConfig::DEFAULT_WORKERS,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check the values before anything is bound or spawned.
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(TaskError::Config {
                message: "socket path is empty".to_string(),
            });
        }
        if self.workers == 0 {
            return Err(TaskError::Config {
                message: "worker count must be at least 1".to_string(),
            });
        }
        if self.workers > PoolConfig::MAX_WORKERS {
            return Err(TaskError::Config {
                message: format!(
                    "worker count {} exceeds maximum {}",
                    self.workers,
                    PoolConfig::MAX_WORKERS
                ),
            });
        }
        Ok(())
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join(IpcConfig::DEFAULT_SOCKET_NAME))
    }
}
