//! In-process SQLite database.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::Value;

use super::error::{DbError, DbResult};
use super::schema::{SchemaProvider, TableSchema};
use super::{BulkLoadStatus, Database, QueryRows};
use crate::sql::{Dialect, SqlDialect};

/// SQLite database backed by a single rusqlite connection.
///
/// Calls run on the blocking thread pool. The bulk path is one transaction
/// over a prepared INSERT; [`SqliteDatabase::without_bulk_load`] turns it
/// off so callers exercise their batch-insert fallback.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    bulk_load_enabled: bool,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("bulk_load_enabled", &self.bulk_load_enabled)
            .finish()
    }
}

impl SqliteDatabase {
    /// Open or create a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| DbError::Connection(format!("{}: {}", path.as_ref().display(), e)))?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            bulk_load_enabled: true,
        }
    }

    /// Report the bulk path as unavailable.
    pub fn without_bulk_load(mut self) -> Self {
        self.bulk_load_enabled = false;
        self
    }

    /// Run several statements synchronously (fixtures, setup scripts).
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> DbResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DbError::Internal("sqlite connection mutex poisoned".into()))
    }

    async fn with_conn<F, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&mut Connection) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| DbError::Internal("sqlite connection mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| DbError::Internal(format!("blocking task failed: {}", e)))?
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

#[async_trait]
impl SchemaProvider for SqliteDatabase {
    async fn table_schema(&self, table: &str) -> DbResult<TableSchema> {
        let name = table.to_string();
        self.with_conn(move |conn| {
            let pragma = format!("PRAGMA table_info({})", Dialect::Sqlite.quote_identifier(&name));
            let mut stmt = conn.prepare(&pragma)?;
            let columns = stmt
                .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            if columns.is_empty() {
                return Err(DbError::TableNotFound(name));
            }
            Ok(columns
                .into_iter()
                .fold(TableSchema::new(name), |schema, (col, ty)| schema.column(col, ty)))
        })
        .await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, sql: &str) -> DbResult<QueryRows> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let width = columns.len();
            let rows = stmt
                .query_map([], |row| {
                    (0..width)
                        .map(|i| row.get_ref(i).map(to_json))
                        .collect::<Result<Vec<_>, _>>()
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(QueryRows { columns, rows })
        })
        .await
    }

    async fn execute(&self, sql: &str) -> DbResult<u64> {
        let sql = sql.to_string();
        self.with_conn(move |conn| Ok(conn.execute(&sql, [])? as u64)).await
    }

    async fn estimate_row_count(&self, table: &str) -> DbResult<u64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", Dialect::Sqlite.quote_qualified(table));
        self.query(&sql).await?.get_u64(0, "n")
    }

    async fn bulk_load(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> DbResult<BulkLoadStatus> {
        if !self.bulk_load_enabled {
            return Ok(BulkLoadStatus::Unavailable(
                "bulk load disabled for this connection".into(),
            ));
        }

        let dialect = Dialect::Sqlite;
        let cols: Vec<String> = columns.iter().map(|c| dialect.quote_identifier(c)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote_qualified(table),
            cols.join(", "),
            placeholders
        );
        let rows: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|r| r.iter().map(to_sql_value).collect())
            .collect();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut loaded = 0u64;
            {
                let mut stmt = tx.prepare(&sql)?;
                for row in &rows {
                    stmt.execute(rusqlite::params_from_iter(row.iter()))?;
                    loaded += 1;
                }
            }
            tx.commit()?;
            Ok(BulkLoadStatus::Loaded(loaded))
        })
        .await
    }
}
