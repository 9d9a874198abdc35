//! Durable destinations for execution records.
//!
//! Sinks are append-only; the engine never reads back from one during a run.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::record::ExecutionRecord;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist a record, returning the id it is stored under.
    async fn persist(&self, record: &ExecutionRecord) -> SinkResult<String>;
}

/// Appends one JSON document per line.
#[derive(Debug)]
pub struct JsonlResultSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlResultSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back (audit tooling and tests).
    pub async fn read_all(&self) -> SinkResult<Vec<ExecutionRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(SinkError::from))
            .collect()
    }
}

#[async_trait]
impl ResultSink for JsonlResultSink {
    async fn persist(&self, record: &ExecutionRecord) -> SinkResult<String> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(record.execution_id.to_string())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryResultSink {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn persist(&self, record: &ExecutionRecord) -> SinkResult<String> {
        self.records
            .lock()
            .map_err(|_| SinkError::Unavailable("memory sink lock poisoned".into()))?
            .push(record.clone());
        Ok(record.execution_id.to_string())
    }
}
