//! Database access layer.
//!
//! The engine needs very little from a database: run a SELECT, run a
//! statement, estimate a row count, describe a table, and (for landing
//! databases) load rows in bulk. [`Database`] captures exactly that, so the
//! coordinator and staging manager never see driver details.
//!
//! Implementations:
//! - [`SqliteDatabase`]: in-process rusqlite connection (landing database, tests)
//! - [`WorkerDatabase`]: remote drivers reached through the worker process

mod error;
mod retry;
mod schema;
mod sqlite;
mod worker;

pub use error::{DbError, DbResult};
pub use retry::RetryPolicy;
pub use schema::{ColumnSchema, SchemaProvider, StaticSchemaProvider, TableSchema};
pub use sqlite::SqliteDatabase;
pub use worker::WorkerDatabase;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sql::Dialect;

/// Result of a SELECT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a result column by name (case-insensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Read a non-negative integer cell, accepting numeric strings.
    pub fn get_u64(&self, row: usize, column: &str) -> DbResult<u64> {
        let idx = self
            .column_index(column)
            .ok_or_else(|| DbError::Query(format!("result has no column '{}'", column)))?;
        let cell = self
            .rows
            .get(row)
            .and_then(|r| r.get(idx))
            .ok_or_else(|| DbError::Query(format!("result has no row {}", row)))?;
        value_as_u64(cell)
            .ok_or_else(|| DbError::Query(format!("column '{}' is not a count: {}", column, cell)))
    }
}

/// Interpret a JSON cell as a count.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Null => Some(0),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i.max(0) as u64))
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.max(0.0) as u64),
        _ => None,
    }
}

/// Outcome of a bulk load attempt.
///
/// `Unavailable` is not an error: the caller falls back to batched inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkLoadStatus {
    Loaded(u64),
    Unavailable(String),
}

/// A source, target or landing database.
#[async_trait]
pub trait Database: SchemaProvider {
    /// SQL dialect spoken by this database.
    fn dialect(&self) -> Dialect;

    /// Run a query and collect every row.
    async fn query(&self, sql: &str) -> DbResult<QueryRows>;

    /// Run a statement, returning rows affected.
    async fn execute(&self, sql: &str) -> DbResult<u64>;

    /// Row count estimate for `table` (may be exact).
    async fn estimate_row_count(&self, table: &str) -> DbResult<u64>;

    /// Load rows using the database's native bulk path, if it has one.
    async fn bulk_load(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> DbResult<BulkLoadStatus>;
}
