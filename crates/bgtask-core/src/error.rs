//! Error types for bgtask.
//!
//! Only `MalformedTask` and `ConnectFailure` are ever visible to a submitting
//! client, and then only as a coarse accepted/rejected signal. Resolution and
//! invocation failures stay inside the worker that hit them.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the bgtask library.
#[derive(Debug, Error)]
pub enum TaskError {
    // Submission errors
    #[error("Malformed task: {reason}")]
    MalformedTask { reason: String },

    #[error("Cannot reach task daemon at {path:?}: {message}")]
    ConnectFailure { path: PathBuf, message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Execution errors
    #[error("Cannot resolve task {name}: {source}")]
    ResolutionFailure {
        name: String,
        #[source]
        source: ResolveError,
    },

    #[error("Task {name} failed: {message}")]
    InvocationFailure { name: String, message: String },

    // IO errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Why a dotted task name could not be turned into something callable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("name {0:?} has no namespace separator")]
    InvalidName(String),

    #[error("namespace {0:?} not found")]
    NamespaceNotFound(String),

    #[error("{symbol:?} not found in namespace {namespace:?}")]
    NotFound { namespace: String, symbol: String },

    #[error("{name:?} is bound to {kind}, not a callable")]
    NotInvokable { name: String, kind: &'static str },
}

/// Result type alias for bgtask operations.
pub type Result<T> = std::result::Result<T, TaskError>;

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TaskError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        TaskError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        TaskError::MalformedTask {
            reason: reason.into(),
        }
    }
}
