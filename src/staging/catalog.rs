//! Catalog of staging tables kept in the landing database.
//!
//! Every staging table gets one catalog row. The row outlives the run so
//! the expiry sweep, which may run in another process, can find it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use super::state::StagingState;
use super::table::{StagingRole, StagingTable};
use super::{StagingError, StagingResult};
use crate::db::{value_as_u64, Database, QueryRows, RetryPolicy};
use crate::sql::{ColumnDef, ColumnType, CreateTable, Dialect, Insert, SqlDialect, Update};

const COLUMNS: &[&str] = &[
    "table_name",
    "execution_id",
    "role",
    "ordinal",
    "origin_table",
    "columns",
    "row_count",
    "size_estimate",
    "created_at_ms",
    "ttl_expires_at_ms",
    "state",
    "indexes",
];

#[derive(Clone)]
pub struct StagingCatalog {
    db: Arc<dyn Database>,
    table: String,
    policy: RetryPolicy,
}

impl std::fmt::Debug for StagingCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingCatalog")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl StagingCatalog {
    pub fn new(db: Arc<dyn Database>, table: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            db,
            table: table.into(),
            policy,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn dialect(&self) -> Dialect {
        self.db.dialect()
    }

    /// Create the catalog table unless it already exists.
    pub async fn ensure(&self) -> StagingResult<()> {
        let exists = format!(
            "SELECT COUNT(*) AS n FROM {}",
            self.dialect().quote_qualified(&self.table)
        );
        if self.db.query(&exists).await.is_ok() {
            return Ok(());
        }

        let ddl = CreateTable::new(&self.table)
            .if_not_exists()
            .columns([
                ColumnDef::new("table_name", ColumnType::Varchar(128)).primary_key(),
                ColumnDef::new("execution_id", ColumnType::Varchar(64)).not_null(),
                ColumnDef::new("role", ColumnType::Varchar(16)).not_null(),
                ColumnDef::new("ordinal", ColumnType::Int32).not_null(),
                ColumnDef::new("origin_table", ColumnType::Varchar(255)).not_null(),
                ColumnDef::new("columns", ColumnType::Text),
                ColumnDef::new("row_count", ColumnType::Int64).not_null(),
                ColumnDef::new("size_estimate", ColumnType::Int64).not_null(),
                ColumnDef::new("created_at_ms", ColumnType::Int64).not_null(),
                ColumnDef::new("ttl_expires_at_ms", ColumnType::Int64).not_null(),
                ColumnDef::new("state", ColumnType::Varchar(16)).not_null(),
                ColumnDef::new("indexes", ColumnType::Text),
            ])
            .to_sql(self.dialect());
        let db = &self.db;
        self.policy
            .call("create staging catalog", || db.execute(&ddl))
            .await?;
        tracing::info!(catalog = %self.table, "created staging catalog");
        Ok(())
    }

    pub async fn insert(&self, table: &StagingTable) -> StagingResult<()> {
        let sql = Insert::new(&self.table)
            .columns(COLUMNS.iter().copied())
            .row(vec![
                json!(table.name),
                json!(table.execution_id.to_string()),
                json!(table.role.as_str()),
                json!(table.ordinal),
                json!(table.origin_table),
                Value::String(serde_json::to_string(&table.columns)?),
                json!(table.row_count),
                json!(table.size_estimate),
                json!(table.created_at.timestamp_millis()),
                json!(table.ttl_expires_at.timestamp_millis()),
                json!(table.state.as_str()),
                Value::String(serde_json::to_string(&table.indexes_created)?),
            ])
            .to_sql(self.dialect());
        let db = &self.db;
        self.policy
            .single_attempt()
            .call("insert catalog row", || db.execute(&sql))
            .await?;
        Ok(())
    }

    /// Write the mutable fields of `table` back to its row.
    pub async fn update(&self, table: &StagingTable) -> StagingResult<()> {
        let sql = Update::new(&self.table)
            .set("row_count", table.row_count)
            .set("size_estimate", table.size_estimate)
            .set("ttl_expires_at_ms", table.ttl_expires_at.timestamp_millis())
            .set("state", table.state.as_str())
            .set(
                "indexes",
                Value::String(serde_json::to_string(&table.indexes_created)?),
            )
            .where_eq("table_name", table.name.as_str())
            .to_sql(self.dialect());
        let db = &self.db;
        let updated = self
            .policy
            .single_attempt()
            .call("update catalog row", || db.execute(&sql))
            .await?;
        if updated == 0 {
            return Err(StagingError::Catalog(format!(
                "no catalog row for {}",
                table.name
            )));
        }
        Ok(())
    }

    pub async fn get(&self, name: &str) -> StagingResult<Option<StagingTable>> {
        let dialect = self.dialect();
        let sql = format!(
            "{} WHERE {} = {}",
            self.select_all(),
            dialect.quote_identifier("table_name"),
            dialect.quote_string(name)
        );
        Ok(self.fetch(&sql).await?.into_iter().next())
    }

    pub async fn list_for_execution(&self, execution_id: &Uuid) -> StagingResult<Vec<StagingTable>> {
        let dialect = self.dialect();
        let sql = format!(
            "{} WHERE {} = {} ORDER BY {}, {}",
            self.select_all(),
            dialect.quote_identifier("execution_id"),
            dialect.quote_string(&execution_id.to_string()),
            dialect.quote_identifier("role"),
            dialect.quote_identifier("ordinal")
        );
        self.fetch(&sql).await
    }

    /// Rows past their TTL that have not been expired yet, oldest first.
    pub async fn expired(&self, now: DateTime<Utc>) -> StagingResult<Vec<StagingTable>> {
        let dialect = self.dialect();
        let sql = format!(
            "{} WHERE {} < {} AND {} <> {} ORDER BY {}, {}",
            self.select_all(),
            dialect.quote_identifier("ttl_expires_at_ms"),
            now.timestamp_millis(),
            dialect.quote_identifier("state"),
            dialect.quote_string(StagingState::Expired.as_str()),
            dialect.quote_identifier("ttl_expires_at_ms"),
            dialect.quote_identifier("table_name")
        );
        self.fetch(&sql).await
    }

    fn select_all(&self) -> String {
        let dialect = self.dialect();
        let cols: Vec<String> = COLUMNS.iter().map(|c| dialect.quote_identifier(c)).collect();
        format!(
            "SELECT {} FROM {}",
            cols.join(", "),
            dialect.quote_qualified(&self.table)
        )
    }

    async fn fetch(&self, sql: &str) -> StagingResult<Vec<StagingTable>> {
        let db = &self.db;
        let rows = self.policy.call("read staging catalog", || db.query(sql)).await?;
        (0..rows.len()).map(|i| decode_row(&rows, i)).collect()
    }
}

fn cell<'a>(rows: &'a QueryRows, row: usize, column: &str) -> StagingResult<&'a Value> {
    rows.column_index(column)
        .and_then(|idx| rows.rows.get(row).and_then(|r| r.get(idx)))
        .ok_or_else(|| StagingError::Catalog(format!("catalog row {row} has no {column}")))
}

fn text(rows: &QueryRows, row: usize, column: &str) -> StagingResult<String> {
    match cell(rows, row, column)? {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        other => Ok(other.to_string()),
    }
}

fn number(rows: &QueryRows, row: usize, column: &str) -> StagingResult<u64> {
    let value = cell(rows, row, column)?;
    value_as_u64(value)
        .ok_or_else(|| StagingError::Catalog(format!("catalog {column} is not a number: {value}")))
}

fn millis(rows: &QueryRows, row: usize, column: &str) -> StagingResult<DateTime<Utc>> {
    let ms = number(rows, row, column)?;
    DateTime::from_timestamp_millis(ms as i64)
        .ok_or_else(|| StagingError::Catalog(format!("catalog {column} out of range: {ms}")))
}

fn string_list(rows: &QueryRows, row: usize, column: &str) -> StagingResult<Vec<String>> {
    let raw = text(rows, row, column)?;
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

fn decode_row(rows: &QueryRows, row: usize) -> StagingResult<StagingTable> {
    let execution_id = text(rows, row, "execution_id")?;
    let role = text(rows, row, "role")?;
    let state = text(rows, row, "state")?;
    Ok(StagingTable {
        name: text(rows, row, "table_name")?,
        execution_id: Uuid::parse_str(&execution_id)
            .map_err(|e| StagingError::Catalog(format!("bad execution id '{execution_id}': {e}")))?,
        role: StagingRole::parse(&role)
            .ok_or_else(|| StagingError::Catalog(format!("bad role '{role}'")))?,
        ordinal: number(rows, row, "ordinal")? as usize,
        origin_table: text(rows, row, "origin_table")?,
        columns: string_list(rows, row, "columns")?,
        row_count: number(rows, row, "row_count")?,
        size_estimate: number(rows, row, "size_estimate")?,
        created_at: millis(rows, row, "created_at_ms")?,
        ttl_expires_at: millis(rows, row, "ttl_expires_at_ms")?,
        indexes_created: string_list(rows, row, "indexes")?,
        state: state.parse().map_err(StagingError::Catalog)?,
    })
}
