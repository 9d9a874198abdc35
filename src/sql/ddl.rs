//! DDL (Data Definition Language) support.
//!
//! Builders for the statements staging needs: CREATE TABLE, CREATE INDEX
//! and DROP TABLE, rendered per dialect.
//!
//! # Examples
//!
//! ```ignore
//! use reconciler::sql::ddl::{ColumnDef, CreateTable};
//! use reconciler::sql::{ColumnType, Dialect};
//!
//! let table = CreateTable::new("stg_orders")
//!     .column(ColumnDef::new("order_id", ColumnType::Int64))
//!     .column(ColumnDef::new("customer", ColumnType::Varchar(64)));
//!
//! println!("{}", table.to_sql(Dialect::Postgres));
//! ```

use super::dialect::{Dialect, SqlDialect};
use super::types::ColumnType;

// ============================================================================
// CREATE TABLE
// ============================================================================

/// CREATE TABLE statement.
#[derive(Debug, Clone)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateTable {
    pub if_not_exists: bool,
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl CreateTable {
    /// Create a new CREATE TABLE statement.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            if_not_exists: false,
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Add IF NOT EXISTS (ignored by dialects that lack it).
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Add a column.
    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }

    /// Add multiple columns.
    pub fn columns(mut self, cols: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns.extend(cols);
        self
    }

    /// Render for the given dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut sql = String::from("CREATE TABLE ");
        if self.if_not_exists && dialect.supports_create_table_if_not_exists() {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&dialect.quote_qualified(&self.name));
        sql.push_str(" (");
        let cols: Vec<String> = self.columns.iter().map(|c| c.to_sql(dialect)).collect();
        sql.push_str(&cols.join(", "));
        sql.push(')');
        sql
    }
}

/// Column definition.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDef {
    /// Create a nullable column.
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    fn to_sql(&self, dialect: Dialect) -> String {
        let mut sql = format!(
            "{} {}",
            dialect.quote_identifier(&self.name),
            dialect.emit_data_type(&self.data_type)
        );
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        sql
    }
}

// ============================================================================
// CREATE INDEX
// ============================================================================

/// CREATE INDEX statement.
#[derive(Debug, Clone)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateIndex {
    pub if_not_exists: bool,
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
}

impl CreateIndex {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            if_not_exists: false,
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    pub fn column(mut self, col: impl Into<String>) -> Self {
        self.columns.push(col.into());
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut sql = String::from("CREATE INDEX ");
        if self.if_not_exists && dialect.supports_create_index_if_not_exists() {
            sql.push_str("IF NOT EXISTS ");
        }
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect();
        sql.push_str(&format!(
            "{} ON {} ({})",
            dialect.quote_identifier(&self.name),
            dialect.quote_qualified(&self.table),
            cols.join(", ")
        ));
        sql
    }
}

// ============================================================================
// DROP TABLE
// ============================================================================

/// DROP TABLE statement.
#[derive(Debug, Clone)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct DropTable {
    pub if_exists: bool,
    pub name: String,
}

impl DropTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            if_exists: false,
            name: name.into(),
        }
    }

    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut sql = String::from("DROP TABLE ");
        if self.if_exists && dialect.supports_drop_if_exists() {
            sql.push_str("IF EXISTS ");
        }
        sql.push_str(&dialect.quote_qualified(&self.name));
        sql
    }
}
