//! Worker transport and remote errors.

use std::io;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    // Transport: the worker process and its pipes.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] io::Error),

    #[error("failed to write to worker: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("failed to read from worker: {0}")]
    ReadFailed(#[source] io::Error),

    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    #[error("failed to deserialize response: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("worker process exited unexpectedly")]
    WorkerExited,

    #[error("response channel closed unexpectedly")]
    ChannelClosed,

    // Remote: error replies from the worker, by code.
    #[error("database driver not found: {0}")]
    DriverNotFound(String),

    #[error("database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The driver has no native bulk path; callers fall back to INSERTs.
    #[error("bulk load unsupported: {0}")]
    BulkLoadUnsupported(String),

    /// Any other error code.
    #[error("worker error: {message} (code: {code})")]
    Remote { code: String, message: String },
}

impl WorkerError {
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_worker_exited(&self) -> bool {
        matches!(self, Self::WorkerExited | Self::ChannelClosed)
    }

    /// Transient failures: a fresh attempt (possibly on a respawned worker)
    /// may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::WorkerExited | Self::ChannelClosed | Self::ConnectionFailed(_)
        )
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for WorkerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}
