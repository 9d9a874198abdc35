//! SQL Dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for SQL dialect differences
//! that matter to staging and reconciliation queries:
//!
//! - Identifier quoting: `"` (ANSI/PG/DuckDB/SQLite), `` ` `` (MySQL), `[]` (T-SQL)
//! - Boolean literals: true/false vs 1/0
//! - Text casts used for case-insensitive matching
//! - Column type names for staging tables
//! - `IF [NOT] EXISTS` support on DDL
//! - Whether unbounded text columns can be index keys
//!
//! # Usage
//!
//! ```ignore
//! use reconciler::sql::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::Postgres;
//! let quoted = dialect.quote_identifier("user");  // "user"
//! ```

mod duckdb;
pub mod helpers;
mod mysql;
mod postgres;
mod sqlite;
mod tsql;

pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;
pub use tsql::TSql;

use serde::{Deserialize, Serialize};

use super::types::ColumnType;

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    fn format_bool(&self, b: bool) -> &'static str;

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Type name used when casting a value to text.
    fn text_cast_type(&self) -> &'static str {
        "VARCHAR"
    }

    /// Wrap an expression in a cast to text.
    fn cast_to_text(&self, expr: &str) -> String {
        format!("CAST({} AS {})", expr, self.text_cast_type())
    }

    /// Limit a SELECT to its first `n` rows.
    fn limit_rows(&self, select: &str, n: u64) -> String {
        format!("SELECT * FROM ({}) AS limited LIMIT {}", select, n)
    }

    // =========================================================================
    // DDL Support
    // =========================================================================

    /// Emit a column type for CREATE TABLE.
    fn emit_data_type(&self, dt: &ColumnType) -> String {
        match dt {
            ColumnType::Bool => "BOOLEAN".into(),
            ColumnType::Int32 => "INTEGER".into(),
            ColumnType::Int64 => "BIGINT".into(),
            ColumnType::Float64 => "DOUBLE PRECISION".into(),
            ColumnType::Decimal(p, s) => format!("DECIMAL({}, {})", p, s),
            ColumnType::Varchar(n) => format!("VARCHAR({})", n),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Date => "DATE".into(),
            ColumnType::Timestamp => "TIMESTAMP".into(),
        }
    }

    /// Whether CREATE TABLE accepts IF NOT EXISTS.
    fn supports_create_table_if_not_exists(&self) -> bool {
        true
    }

    /// Whether CREATE INDEX accepts IF NOT EXISTS.
    fn supports_create_index_if_not_exists(&self) -> bool {
        true
    }

    /// Whether DROP TABLE accepts IF EXISTS.
    fn supports_drop_if_exists(&self) -> bool {
        true
    }

    /// Whether an unbounded text column can be used as an index key.
    ///
    /// MySQL needs a prefix length on TEXT keys; T-SQL rejects NVARCHAR(MAX) keys.
    fn can_index_unbounded_text(&self) -> bool {
        true
    }

    /// Maximum rows accepted by one multi-row VALUES list.
    fn max_insert_rows(&self) -> usize {
        usize::MAX
    }

    /// Maximum identifier length.
    fn max_identifier_length(&self) -> usize {
        63
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    Postgres,
    DuckDb,
    MySql,
    TSql,
    Sqlite,
}

impl Dialect {
    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Postgres => &Postgres,
            Dialect::DuckDb => &DuckDb,
            Dialect::MySql => &MySql,
            Dialect::TSql => &TSql,
            Dialect::Sqlite => &Sqlite,
        }
    }

    /// Quote a possibly schema-qualified name (`schema.table`).
    pub fn quote_qualified(&self, name: &str) -> String {
        name.split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Parse a dialect name as used on the command line and in config.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "duckdb" => Some(Dialect::DuckDb),
            "mysql" => Some(Dialect::MySql),
            "tsql" | "mssql" | "sqlserver" => Some(Dialect::TSql),
            "sqlite" => Some(Dialect::Sqlite),
            _ => None,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn text_cast_type(&self) -> &'static str {
        self.dialect().text_cast_type()
    }

    fn cast_to_text(&self, expr: &str) -> String {
        self.dialect().cast_to_text(expr)
    }

    fn limit_rows(&self, select: &str, n: u64) -> String {
        self.dialect().limit_rows(select, n)
    }

    fn emit_data_type(&self, dt: &ColumnType) -> String {
        self.dialect().emit_data_type(dt)
    }

    fn supports_create_table_if_not_exists(&self) -> bool {
        self.dialect().supports_create_table_if_not_exists()
    }

    fn supports_create_index_if_not_exists(&self) -> bool {
        self.dialect().supports_create_index_if_not_exists()
    }

    fn supports_drop_if_exists(&self) -> bool {
        self.dialect().supports_drop_if_exists()
    }

    fn can_index_unbounded_text(&self) -> bool {
        self.dialect().can_index_unbounded_text()
    }

    fn max_insert_rows(&self) -> usize {
        self.dialect().max_insert_rows()
    }

    fn max_identifier_length(&self) -> usize {
        self.dialect().max_identifier_length()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
