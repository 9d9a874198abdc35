//! Async client for communicating with the database worker process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};

use super::error::{WorkerError, WorkerResult};
use super::protocol::{codes, ConnectionParams, ErrorInfo, RequestEnvelope, ResponseEnvelope};
use crate::config::{parse_duration, Settings};

/// Default timeout for requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>;

/// Async client for the database worker.
///
/// The client spawns the worker as a child process and communicates via
/// NDJSON over stdin/stdout. Each request carries a unique ID so several
/// requests (one per side of a federated extraction, say) can be in flight
/// at once.
///
/// # Example
///
/// ```ignore
/// use reconciler::worker::WorkerClient;
///
/// let client = WorkerClient::spawn("./reconciler-worker").await?;
/// let conn = WorkerClient::connection("postgres", "postgres://erp-db/erp");
/// let rows = client.execute_query(&conn, "SELECT 1").await?;
/// ```
pub struct WorkerClient {
    stdin: Arc<Mutex<BufWriter<ChildStdin>>>,
    pending: PendingMap,
    _child: Child,
    reader_task: tokio::task::JoinHandle<()>,
    timeout: Duration,
}

impl std::fmt::Debug for WorkerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerClient")
            .field("timeout", &self.timeout)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl WorkerClient {
    /// Spawn a new worker process with the default timeout.
    pub async fn spawn<P: AsRef<Path>>(worker_path: P) -> WorkerResult<Self> {
        Self::spawn_with_args_and_timeout(worker_path, &[], DEFAULT_TIMEOUT).await
    }

    /// Spawn a worker using settings configuration.
    ///
    /// Pool settings and the request timeout come from the `[worker]` section.
    pub async fn spawn_with_settings(settings: &Settings) -> WorkerResult<Self> {
        let worker_path = Self::resolve_worker_path(settings)?;
        let pool_args = settings.worker.pool.to_worker_args();
        let timeout = parse_duration(&settings.worker.request_timeout)
            .map_err(|e| WorkerError::InvalidRequest(e.to_string()))?;

        Self::spawn_with_args_and_timeout(&worker_path, &pool_args, timeout).await
    }

    /// Resolve the worker binary path from settings, then common locations.
    fn resolve_worker_path(settings: &Settings) -> WorkerResult<PathBuf> {
        if let Some(path) = &settings.worker.path {
            return Ok(PathBuf::from(path));
        }

        let candidates = ["./reconciler-worker", "./worker/reconciler-worker"];
        for candidate in candidates {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(path);
            }
        }

        // Fall back to PATH lookup by the OS
        Ok(PathBuf::from("reconciler-worker"))
    }

    /// Spawn a worker with arguments and custom timeout.
    pub async fn spawn_with_args_and_timeout<P: AsRef<Path>>(
        worker_path: P,
        args: &[String],
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let mut child = Command::new(worker_path.as_ref())
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or(WorkerError::WorkerExited)?;
        let stdout = child.stdout.take().ok_or(WorkerError::WorkerExited)?;

        let stdin = Arc::new(Mutex::new(BufWriter::new(stdin)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_task = Self::spawn_reader_task(stdout, pending.clone());

        tracing::debug!(path = %worker_path.as_ref().display(), "spawned database worker");

        Ok(Self {
            stdin,
            pending,
            _child: child,
            reader_task,
            timeout,
        })
    }

    /// Spawn the background task that reads responses from the worker.
    fn spawn_reader_task(stdout: ChildStdout, pending: PendingMap) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => match serde_json::from_str::<ResponseEnvelope>(&line) {
                        Ok(resp) => {
                            let mut pending = pending.lock().await;
                            if let Some(tx) = pending.remove(&resp.id) {
                                let _ = tx.send(resp);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to parse worker response");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "worker read error");
                        break;
                    }
                }
            }

            // Worker exited - fail every pending request
            let mut pending = pending.lock().await;
            for (id, tx) in pending.drain() {
                let _ = tx.send(ResponseEnvelope {
                    id,
                    success: false,
                    result: None,
                    error: Some(ErrorInfo {
                        code: codes::WORKER_EXITED.to_string(),
                        message: "Worker process exited unexpectedly".to_string(),
                    }),
                });
            }
        })
    }

    /// Send a request to the worker and wait for a response.
    pub async fn request<P, R>(&self, method: &str, params: P) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = uuid::Uuid::new_v4().to_string();

        let request = RequestEnvelope {
            id: id.clone(),
            method: method.to_string(),
            params: serde_json::to_value(params).map_err(WorkerError::SerializeFailed)?,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        {
            let mut stdin = self.stdin.lock().await;
            let line =
                serde_json::to_string(&request).map_err(WorkerError::SerializeFailed)? + "\n";
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(WorkerError::WriteFailed)?;
            stdin.flush().await.map_err(WorkerError::WriteFailed)?;
        }

        tracing::trace!(%id, method, "worker request sent");

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(WorkerError::ChannelClosed),
            Err(_) => {
                // Drop the registration so the map does not grow
                self.pending.lock().await.remove(&id);
                return Err(WorkerError::Timeout(self.timeout.as_millis() as u64));
            }
        };

        if response.success {
            let result = response.result.unwrap_or(serde_json::Value::Null);
            serde_json::from_value(result).map_err(WorkerError::DeserializeFailed)
        } else {
            let error = response.error.unwrap_or_else(|| ErrorInfo {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(Self::classify_error(&error.code, &error.message))
        }
    }

    /// Classify a worker error into a more specific error type.
    fn classify_error(code: &str, message: &str) -> WorkerError {
        match code {
            codes::DRIVER_NOT_FOUND => WorkerError::DriverNotFound(message.to_string()),
            codes::CONNECTION_FAILED => WorkerError::ConnectionFailed(message.to_string()),
            codes::INVALID_REQUEST => WorkerError::InvalidRequest(message.to_string()),
            codes::METHOD_NOT_FOUND => WorkerError::MethodNotFound(message.to_string()),
            codes::TABLE_NOT_FOUND => WorkerError::TableNotFound(message.to_string()),
            codes::BULK_LOAD_UNSUPPORTED => WorkerError::BulkLoadUnsupported(message.to_string()),
            codes::WORKER_EXITED => WorkerError::WorkerExited,
            _ => WorkerError::remote(code, message),
        }
    }

    /// Check if the worker is still running.
    pub fn is_alive(&self) -> bool {
        !self.reader_task.is_finished()
    }

    /// Build connection parameters for a request.
    pub fn connection(driver: &str, connection_string: &str) -> ConnectionParams {
        ConnectionParams {
            driver: driver.to_string(),
            connection_string: connection_string.to_string(),
        }
    }
}

// Convenience methods for common operations
impl WorkerClient {
    /// Get the columns of a table.
    pub async fn get_columns(
        &self,
        connection: &ConnectionParams,
        schema: &str,
        table: &str,
    ) -> WorkerResult<super::protocol::GetColumnsResponse> {
        use super::protocol::{methods, GetColumnsParams};

        self.request(
            methods::GET_COLUMNS,
            GetColumnsParams {
                connection: connection.clone(),
                schema: schema.to_string(),
                table: table.to_string(),
            },
        )
        .await
    }

    /// Get an estimated row count for a table.
    pub async fn get_row_count(
        &self,
        connection: &ConnectionParams,
        schema: &str,
        table: &str,
    ) -> WorkerResult<super::protocol::RowCountResponse> {
        use super::protocol::{methods, GetRowCountParams};

        self.request(
            methods::GET_ROW_COUNT,
            GetRowCountParams {
                connection: connection.clone(),
                schema: schema.to_string(),
                table: table.to_string(),
                exact: Some(false),
            },
        )
        .await
    }

    /// Execute a SQL statement.
    pub async fn execute_query(
        &self,
        connection: &ConnectionParams,
        sql: &str,
    ) -> WorkerResult<super::protocol::ExecuteQueryResponse> {
        use super::protocol::{methods, ExecuteQueryParams};

        self.request(
            methods::EXECUTE_QUERY,
            ExecuteQueryParams {
                connection: connection.clone(),
                sql: sql.to_string(),
                args: None,
            },
        )
        .await
    }

    /// Load rows through the driver's native bulk path.
    pub async fn bulk_load(
        &self,
        connection: &ConnectionParams,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<serde_json::Value>>,
    ) -> WorkerResult<super::protocol::BulkLoadResponse> {
        use super::protocol::{methods, BulkLoadParams};

        self.request(
            methods::BULK_LOAD,
            BulkLoadParams {
                connection: connection.clone(),
                table: table.to_string(),
                columns: columns.to_vec(),
                rows,
            },
        )
        .await
    }
}
