//! DML (Data Manipulation Language) support.
//!
//! Multi-row INSERT and keyed UPDATE builders. Values are `serde_json::Value`
//! cells as returned by extraction queries and rendered as dialect literals.

use serde_json::Value;

use super::dialect::{Dialect, SqlDialect};

/// Render a JSON cell as a SQL literal.
///
/// Arrays and objects are stored as their JSON text.
pub fn render_literal(value: &Value, dialect: Dialect) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => dialect.format_bool(*b).to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => dialect.quote_string(s),
        Value::Array(_) | Value::Object(_) => dialect.quote_string(&value.to_string()),
    }
}

// ============================================================================
// INSERT
// ============================================================================

/// Multi-row INSERT statement.
#[derive(Debug, Clone)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Insert {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn columns<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Add one row. Must have one value per column.
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Render as a single statement.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        Self::render(&self.table, &self.columns, &self.rows, dialect)
    }

    /// Render as statements of at most `batch_size` rows each, further capped
    /// by the dialect's VALUES row limit.
    pub fn to_sql_batches(&self, dialect: Dialect, batch_size: usize) -> Vec<String> {
        let size = batch_size.max(1).min(dialect.max_insert_rows());
        self.rows
            .chunks(size)
            .map(|chunk| Self::render(&self.table, &self.columns, chunk, dialect))
            .collect()
    }

    fn render(table: &str, columns: &[String], rows: &[Vec<Value>], dialect: Dialect) -> String {
        let cols: Vec<String> = columns.iter().map(|c| dialect.quote_identifier(c)).collect();
        let values: Vec<String> = rows
            .iter()
            .map(|row| {
                let cells: Vec<String> = row.iter().map(|v| render_literal(v, dialect)).collect();
                format!("({})", cells.join(", "))
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            dialect.quote_qualified(table),
            cols.join(", "),
            values.join(", ")
        )
    }
}

// ============================================================================
// UPDATE
// ============================================================================

/// UPDATE with equality-only WHERE conditions.
#[derive(Debug, Clone)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub conditions: Vec<(String, Value)>,
}

impl Update {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let sets: Vec<String> = self
            .assignments
            .iter()
            .map(|(c, v)| format!("{} = {}", dialect.quote_identifier(c), render_literal(v, dialect)))
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_qualified(&self.table),
            sets.join(", ")
        );
        if !self.conditions.is_empty() {
            let conds: Vec<String> = self
                .conditions
                .iter()
                .map(|(c, v)| match v {
                    Value::Null => format!("{} IS NULL", dialect.quote_identifier(c)),
                    _ => format!("{} = {}", dialect.quote_identifier(c), render_literal(v, dialect)),
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conds.join(" AND "));
        }
        sql
    }
}
