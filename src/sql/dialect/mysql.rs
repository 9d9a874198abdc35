//! MySQL SQL dialect.
//!
//! MySQL features:
//! - Backtick identifier quoting
//! - Backslash escapes inside string literals
//! - Booleans as 1/0
//! - No `IF NOT EXISTS` on CREATE INDEX
//! - TEXT columns need a prefix length to be indexed, so they are skipped

use super::helpers;
use super::SqlDialect;
use crate::sql::types::ColumnType;

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_mysql(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn text_cast_type(&self) -> &'static str {
        "CHAR"
    }

    fn emit_data_type(&self, dt: &ColumnType) -> String {
        match dt {
            ColumnType::Bool => "TINYINT(1)".into(),
            ColumnType::Int32 => "INT".into(),
            ColumnType::Int64 => "BIGINT".into(),
            ColumnType::Float64 => "DOUBLE".into(),
            ColumnType::Decimal(p, s) => format!("DECIMAL({}, {})", p, s),
            ColumnType::Varchar(n) => format!("VARCHAR({})", n),
            ColumnType::Text => "LONGTEXT".into(),
            ColumnType::Date => "DATE".into(),
            ColumnType::Timestamp => "DATETIME".into(),
        }
    }

    fn supports_create_index_if_not_exists(&self) -> bool {
        false
    }

    fn can_index_unbounded_text(&self) -> bool {
        false
    }

    fn max_identifier_length(&self) -> usize {
        64
    }
}
