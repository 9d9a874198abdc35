//! T-SQL (SQL Server) dialect.
//!
//! T-SQL features:
//! - Square bracket identifier quoting
//! - `N'...'` literals for Unicode strings
//! - BIT booleans as 1/0
//! - No `IF NOT EXISTS` on CREATE TABLE or CREATE INDEX
//! - Row constructor VALUES lists capped at 1000 rows
//! - NVARCHAR(MAX) cannot be an index key
//! - `TOP n` instead of `LIMIT n`

use super::helpers;
use super::SqlDialect;
use crate::sql::types::ColumnType;

/// T-SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct TSql;

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_bracket(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_unicode(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn text_cast_type(&self) -> &'static str {
        "NVARCHAR(4000)"
    }

    fn limit_rows(&self, select: &str, n: u64) -> String {
        format!("SELECT TOP {} * FROM ({}) AS limited", n, select)
    }

    fn emit_data_type(&self, dt: &ColumnType) -> String {
        match dt {
            ColumnType::Bool => "BIT".into(),
            ColumnType::Int32 => "INT".into(),
            ColumnType::Int64 => "BIGINT".into(),
            ColumnType::Float64 => "FLOAT".into(),
            ColumnType::Decimal(p, s) => format!("DECIMAL({}, {})", p, s),
            ColumnType::Varchar(n) => format!("NVARCHAR({})", n),
            ColumnType::Text => "NVARCHAR(MAX)".into(),
            ColumnType::Date => "DATE".into(),
            ColumnType::Timestamp => "DATETIME2".into(),
        }
    }

    fn supports_create_table_if_not_exists(&self) -> bool {
        false
    }

    fn supports_create_index_if_not_exists(&self) -> bool {
        false
    }

    fn can_index_unbounded_text(&self) -> bool {
        false
    }

    fn max_insert_rows(&self) -> usize {
        1000
    }

    fn max_identifier_length(&self) -> usize {
        128
    }
}
