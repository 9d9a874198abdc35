//! Table schemas and the schema provider seam.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{DbError, DbResult};
use crate::sql::ColumnType;

/// A column as reported by a schema provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Database-specific type name.
    pub data_type: String,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }

    /// Portable type parsed from `data_type`.
    pub fn column_type(&self) -> ColumnType {
        ColumnType::parse(&self.data_type)
    }
}

/// Ordered column list for a named table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        self.columns.push(ColumnSchema::new(name, data_type));
        self
    }

    /// Find a column by exact name, falling back to a case-insensitive match.
    pub fn find(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    /// Error unless every named column exists.
    pub fn require_columns<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> DbResult<()> {
        for name in names {
            if self.find(name).is_none() {
                return Err(DbError::ColumnNotFound {
                    table: self.name.clone(),
                    column: name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Source of table schemas.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Ordered columns of `table`, or `DbError::TableNotFound`.
    async fn table_schema(&self, table: &str) -> DbResult<TableSchema>;
}

/// In-memory schema map.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaProvider {
    tables: HashMap<String, TableSchema>,
}

impl StaticSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.tables.insert(schema.name.clone(), schema);
        self
    }

    /// Load a JSON array of table schemas.
    pub fn from_json_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DbError::Internal(format!("{}: {}", path.as_ref().display(), e)))?;
        let tables: Vec<TableSchema> =
            serde_json::from_str(&content).map_err(|e| DbError::Internal(e.to_string()))?;
        Ok(tables.into_iter().fold(Self::new(), Self::with_table))
    }
}

#[async_trait]
impl SchemaProvider for StaticSchemaProvider {
    async fn table_schema(&self, table: &str) -> DbResult<TableSchema> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }
}
