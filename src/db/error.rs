//! Database access errors.

use thiserror::Error;

use crate::worker::WorkerError;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    /// Connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// The database is busy or locked.
    #[error("database busy: {0}")]
    Busy(String),

    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("column not found: {table}.{column}")]
    ColumnNotFound { table: String, column: String },

    /// Statement was rejected or failed to execute.
    #[error("query failed: {0}")]
    Query(String),

    #[error(transparent)]
    Worker(WorkerError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// Whether the operation may succeed if retried.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Busy(_) | Self::Timeout(_) => true,
            Self::Worker(e) => e.is_retriable(),
            _ => false,
        }
    }

    /// Whether this error means a referenced table or column is missing.
    pub fn is_schema_not_found(&self) -> bool {
        matches!(self, Self::TableNotFound(_) | Self::ColumnNotFound { .. })
    }
}

impl From<WorkerError> for DbError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::TableNotFound(t) => Self::TableNotFound(t),
            WorkerError::ConnectionFailed(m) => Self::Connection(m),
            WorkerError::Timeout(ms) => Self::Timeout(ms),
            other => Self::Worker(other),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => {
                let message = msg.clone().unwrap_or_else(|| e.to_string());
                match e.code {
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Self::Busy(message),
                    ErrorCode::CannotOpen | ErrorCode::NotADatabase => Self::Connection(message),
                    _ if message.starts_with("no such table") => Self::TableNotFound(
                        message.trim_start_matches("no such table:").trim().to_string(),
                    ),
                    _ => Self::Query(message),
                }
            }
            _ => Self::Query(err.to_string()),
        }
    }
}
