//! SQLite dialect.
//!
//! SQLite stores values by affinity, so staging types collapse to
//! INTEGER, REAL, NUMERIC and TEXT.

use super::helpers;
use super::SqlDialect;
use crate::sql::types::ColumnType;

/// SQLite dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn text_cast_type(&self) -> &'static str {
        "TEXT"
    }

    fn emit_data_type(&self, dt: &ColumnType) -> String {
        match dt {
            ColumnType::Bool | ColumnType::Int32 | ColumnType::Int64 => "INTEGER".into(),
            ColumnType::Float64 => "REAL".into(),
            ColumnType::Decimal(_, _) => "NUMERIC".into(),
            ColumnType::Varchar(_)
            | ColumnType::Text
            | ColumnType::Date
            | ColumnType::Timestamp => "TEXT".into(),
        }
    }

    fn max_identifier_length(&self) -> usize {
        usize::MAX
    }
}
