//! Database reached through the worker process.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::error::{DbError, DbResult};
use super::schema::{SchemaProvider, TableSchema};
use super::{BulkLoadStatus, Database, QueryRows};
use crate::config::{ConnectionConfig, Driver};
use crate::sql::Dialect;
use crate::worker::protocol::ConnectionParams;
use crate::worker::{WorkerClient, WorkerError};

/// [`Database`] over a shared [`WorkerClient`] and one connection.
///
/// Several `WorkerDatabase`s may share a client; each carries its own
/// connection parameters.
#[derive(Debug, Clone)]
pub struct WorkerDatabase {
    client: Arc<WorkerClient>,
    connection: ConnectionParams,
    driver: Driver,
    default_schema: String,
}

impl WorkerDatabase {
    pub fn new(client: Arc<WorkerClient>, config: &ConnectionConfig) -> Self {
        Self {
            client,
            connection: WorkerClient::connection(config.driver.as_str(), &config.connection_string()),
            driver: config.driver,
            default_schema: String::new(),
        }
    }

    /// Connect with a ready-made connection string.
    pub fn from_connection_string(
        client: Arc<WorkerClient>,
        driver: Driver,
        connection_string: &str,
    ) -> Self {
        Self {
            client,
            connection: WorkerClient::connection(driver.as_str(), connection_string),
            driver,
            default_schema: String::new(),
        }
    }

    /// Schema used for unqualified table names (driver default when empty).
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    fn split_table<'a>(&'a self, table: &'a str) -> (&'a str, &'a str) {
        match table.rsplit_once('.') {
            Some((schema, name)) => (schema, name),
            None => (self.default_schema.as_str(), table),
        }
    }
}

#[async_trait]
impl SchemaProvider for WorkerDatabase {
    async fn table_schema(&self, table: &str) -> DbResult<TableSchema> {
        let (schema, name) = self.split_table(table);
        let mut response = self.client.get_columns(&self.connection, schema, name).await?;
        if response.columns.is_empty() {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        response.columns.sort_by_key(|c| c.position);
        Ok(response
            .columns
            .into_iter()
            .fold(TableSchema::new(table), |s, c| s.column(c.name, c.data_type)))
    }
}

#[async_trait]
impl Database for WorkerDatabase {
    fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    async fn query(&self, sql: &str) -> DbResult<QueryRows> {
        let response = self.client.execute_query(&self.connection, sql).await?;
        Ok(QueryRows {
            columns: response.columns.into_iter().map(|c| c.name).collect(),
            rows: response.rows,
        })
    }

    async fn execute(&self, sql: &str) -> DbResult<u64> {
        let response = self.client.execute_query(&self.connection, sql).await?;
        Ok(response.rows_affected.unwrap_or(0).max(0) as u64)
    }

    async fn estimate_row_count(&self, table: &str) -> DbResult<u64> {
        let (schema, name) = self.split_table(table);
        let response = self.client.get_row_count(&self.connection, schema, name).await?;
        Ok(response.row_count.max(0) as u64)
    }

    async fn bulk_load(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> DbResult<BulkLoadStatus> {
        match self
            .client
            .bulk_load(&self.connection, table, columns, rows.to_vec())
            .await
        {
            Ok(resp) => Ok(BulkLoadStatus::Loaded(resp.rows_loaded.max(0) as u64)),
            Err(WorkerError::BulkLoadUnsupported(reason)) => Ok(BulkLoadStatus::Unavailable(reason)),
            Err(WorkerError::MethodNotFound(_)) => Ok(BulkLoadStatus::Unavailable(format!(
                "worker has no bulk path for {}",
                self.driver.as_str()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
