//! Task descriptor wire format.
//!
//! A request is one UTF-8 JSON object written on a fresh connection:
//!
//! ```text
//! {"name": "<namespace>.<callable>", "args": [...], "kwargs": {...}}
//! ```
//!
//! `args` and `kwargs` are optional and default to empty. The reply is one of
//! two literal tokens, `Queued` or `ERROR`, after which the connection closes.
//! There is no length prefix: the listener stops reading as soon as the bytes
//! it holds parse as one complete JSON value, at EOF, or at
//! [`IpcConfig::MAX_REQUEST_SIZE`]. Bytes after the first complete value are
//! ignored, however the payload was split across writes.

use crate::config::IpcConfig;
use crate::{Result, TaskError};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A request to run one named callable with JSON arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TaskDescriptor {
    /// Start a descriptor with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Build a descriptor from already-JSON arguments.
    pub fn from_parts(
        name: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            args,
            kwargs,
        }
    }

    /// Append a positional argument.
    ///
    /// Fails if `value` has no JSON representation (e.g. a map with
    /// non-string keys).
    pub fn arg<T: Serialize>(mut self, value: T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| TaskError::malformed(format!("argument {}: {}", self.args.len(), e)))?;
        self.args.push(value);
        Ok(self)
    }

    /// Set a keyword argument, replacing any earlier value for `key`.
    pub fn kwarg<T: Serialize>(mut self, key: impl Into<String>, value: T) -> Result<Self> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| TaskError::malformed(format!("keyword argument {}: {}", key, e)))?;
        self.kwargs.insert(key, value);
        Ok(self)
    }
}

/// Split a dotted task name into namespace and final symbol.
///
/// Both parts must be non-empty.
pub fn split_task_name(name: &str) -> Option<(&str, &str)> {
    let (namespace, symbol) = name.rsplit_once('.')?;
    if namespace.is_empty() || symbol.is_empty() {
        return None;
    }
    Some((namespace, symbol))
}

/// Serialize a descriptor to its wire form.
pub fn encode(descriptor: &TaskDescriptor) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(descriptor)?)
}

/// Parse and validate a descriptor from raw request bytes.
///
/// Rejects anything that is not a JSON object with a non-empty string `name`,
/// an array `args` and an object `kwargs` (the latter two may be absent but
/// not `null`). Unknown fields are ignored.
pub fn decode(bytes: &[u8]) -> Result<TaskDescriptor> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| TaskError::malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(TaskError::malformed(format!(
            "expected a JSON object, got {}",
            json_type(&value)
        )));
    }

    let descriptor: TaskDescriptor =
        serde_json::from_value(value).map_err(|e| TaskError::malformed(e.to_string()))?;

    if descriptor.name.is_empty() {
        return Err(TaskError::malformed("name is empty"));
    }

    Ok(descriptor)
}

/// Name of a JSON value's type, for error messages.
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Acknowledgement sent back for each submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Queued,
    Error,
}

impl Ack {
    pub const QUEUED_TOKEN: &'static str = "Queued";
    pub const ERROR_TOKEN: &'static str = "ERROR";

    pub fn as_str(&self) -> &'static str {
        match self {
            Ack::Queued => Self::QUEUED_TOKEN,
            Ack::Error => Self::ERROR_TOKEN,
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Ack::Queued)
    }

    /// Parse an acknowledgement token, ignoring surrounding whitespace.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|_| TaskError::Protocol {
            message: "acknowledgement is not valid UTF-8".to_string(),
        })?;
        match text.trim() {
            Self::QUEUED_TOKEN => Ok(Ack::Queued),
            Self::ERROR_TOKEN => Ok(Ack::Error),
            "" => Err(TaskError::Protocol {
                message: "daemon closed the connection without acknowledging".to_string(),
            }),
            other => Err(TaskError::Protocol {
                message: format!("unexpected acknowledgement {:?}", other),
            }),
        }
    }
}

impl std::fmt::Display for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read one request payload, at most `limit` bytes.
///
/// Returns the first complete JSON value as soon as it has been buffered,
/// dropping anything read after it, or at EOF with whatever arrived. Anything
/// still incomplete at `limit` bytes is rejected as malformed.
pub async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(IpcConfig::READ_CHUNK_SIZE.min(limit));
    let mut chunk = [0u8; IpcConfig::READ_CHUNK_SIZE];

    loop {
        let remaining = limit.saturating_sub(buf.len());
        if remaining == 0 {
            return Err(TaskError::malformed(format!(
                "payload exceeds {} bytes",
                limit
            )));
        }

        let want = remaining.min(chunk.len());
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = complete_value_end(&buf) {
            buf.truncate(end);
            return Ok(buf);
        }
    }
}

/// Where the first JSON value in `buf` ends, or `None` while it may still
/// be incomplete.
///
/// Garbage ends at `buf.len()` so the caller stops reading and rejects it.
fn complete_value_end(buf: &[u8]) -> Option<usize> {
    let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<IgnoredAny>();
    match values.next() {
        Some(Ok(_)) => Some(values.byte_offset()),
        Some(Err(e)) if e.is_eof() => None,
        Some(Err(_)) => Some(buf.len()),
        None => None,
    }
}
