//! DuckDB SQL dialect.
//!
//! DuckDB is largely Postgres-compatible. Differences that matter here:
//! - `VARCHAR` is the canonical text type (TEXT is an alias)
//! - `DOUBLE` rather than `DOUBLE PRECISION`

use super::helpers;
use super::SqlDialect;
use crate::sql::types::ColumnType;

/// DuckDB SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn emit_data_type(&self, dt: &ColumnType) -> String {
        match dt {
            ColumnType::Float64 => "DOUBLE".into(),
            ColumnType::Text => "VARCHAR".into(),
            ColumnType::Bool => "BOOLEAN".into(),
            ColumnType::Int32 => "INTEGER".into(),
            ColumnType::Int64 => "BIGINT".into(),
            ColumnType::Decimal(p, s) => format!("DECIMAL({}, {})", p, s),
            ColumnType::Varchar(n) => format!("VARCHAR({})", n),
            ColumnType::Date => "DATE".into(),
            ColumnType::Timestamp => "TIMESTAMP".into(),
        }
    }
}
