//! Protocol types for worker communication.
//!
//! Requests and responses are single-line JSON objects (NDJSON) exchanged
//! over the worker's stdin/stdout.

use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Request envelope sent to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation.
    pub id: String,
    /// Method name (e.g., "query.execute").
    pub method: String,
    /// Method-specific parameters.
    pub params: serde_json::Value,
}

/// Response envelope received from the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to.
    pub id: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Result data (present if success = true).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error information (present if success = false).
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

/// Error information in a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

// ============================================================================
// Connection Parameters (included in all requests)
// ============================================================================

/// Database connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Database driver name (e.g., "postgres", "mssql").
    pub driver: String,
    /// Driver-specific connection string.
    pub connection_string: String,
}

// ============================================================================
// Request Parameters
// ============================================================================

/// Parameters for `metadata.get_columns`.
#[derive(Debug, Clone, Serialize)]
pub struct GetColumnsParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    /// Schema the table belongs to (driver default when empty).
    pub schema: String,
    pub table: String,
}

/// Parameters for `metadata.get_row_count`.
#[derive(Debug, Clone, Serialize)]
pub struct GetRowCountParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub schema: String,
    pub table: String,
    /// Exact count (slower) instead of a catalog estimate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact: Option<bool>,
}

/// Parameters for `query.execute`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteQueryParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<serde_json::Value>>,
}

/// Parameters for `bulk.load`.
///
/// The worker streams rows through the driver's native bulk path
/// (COPY, LOAD DATA, bulk copy). Drivers without one answer with
/// `BULK_LOAD_UNSUPPORTED`.
#[derive(Debug, Clone, Serialize)]
pub struct BulkLoadParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

// ============================================================================
// Response Types
// ============================================================================

/// Column information.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Ordinal position (1-based).
    pub position: i32,
    /// Database-specific type name.
    pub data_type: String,
    pub is_nullable: bool,
    #[serde(default)]
    pub max_length: Option<i32>,
}

/// Response from `metadata.get_columns`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetColumnsResponse {
    pub columns: Vec<ColumnInfo>,
}

/// Response from `metadata.get_row_count`.
#[derive(Debug, Clone, Deserialize)]
pub struct RowCountResponse {
    pub row_count: i64,
    /// Whether this is an exact count or estimate.
    pub is_exact: bool,
}

/// Column information in query results.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResultColumn {
    pub name: String,
    pub data_type: String,
}

/// Response from `query.execute`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteQueryResponse {
    pub columns: Vec<QueryResultColumn>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: i32,
    /// Rows affected (for INSERT/UPDATE/DELETE/DDL).
    #[serde(default)]
    pub rows_affected: Option<i64>,
}

/// Response from `bulk.load`.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkLoadResponse {
    pub rows_loaded: i64,
}

// ============================================================================
// Method Names
// ============================================================================

/// Worker method names.
pub mod methods {
    pub const GET_COLUMNS: &str = "metadata.get_columns";
    pub const GET_ROW_COUNT: &str = "metadata.get_row_count";
    pub const EXECUTE_QUERY: &str = "query.execute";
    pub const BULK_LOAD: &str = "bulk.load";
}

/// Error codes the worker reports.
pub mod codes {
    pub const DRIVER_NOT_FOUND: &str = "DRIVER_NOT_FOUND";
    pub const CONNECTION_FAILED: &str = "CONNECTION_FAILED";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
    pub const TABLE_NOT_FOUND: &str = "TABLE_NOT_FOUND";
    pub const QUERY_FAILED: &str = "QUERY_FAILED";
    pub const BULK_LOAD_UNSUPPORTED: &str = "BULK_LOAD_UNSUPPORTED";
    pub const WORKER_EXITED: &str = "WORKER_EXITED";
}
