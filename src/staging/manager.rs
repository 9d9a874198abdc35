//! Staging table creation, loading and indexing.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::catalog::StagingCatalog;
use super::clock::Clock;
use super::state::StagingState;
use super::table::{index_name, staging_table_name, StagingRole, StagingTable};
use super::{StagingError, StagingResult};
use crate::config::RunConfig;
use crate::db::{BulkLoadStatus, ColumnSchema, Database, RetryPolicy};
use crate::sql::{ColumnDef, CreateIndex, CreateTable, Insert, SqlDialect};
use crate::warning::Warning;

/// How rows reached a staging table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Native bulk path.
    Bulk { rows: u64 },
    /// Bulk path unavailable; rows went in as multi-row INSERTs.
    Batched {
        rows: u64,
        statements: usize,
        reason: String,
    },
}

impl LoadOutcome {
    pub fn rows(&self) -> u64 {
        match self {
            LoadOutcome::Bulk { rows } | LoadOutcome::Batched { rows, .. } => *rows,
        }
    }

    pub fn warning(&self, table: &str) -> Option<Warning> {
        match self {
            LoadOutcome::Bulk { .. } => None,
            LoadOutcome::Batched { reason, .. } => Some(Warning::BulkLoadUnavailable {
                table: table.to_string(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Result of one index attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    Created,
    /// Not attempted: the dialect cannot index this column type.
    Skipped(String),
    Failed(String),
}

/// Per-column index results, in attempt order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    pub columns: Vec<(String, IndexStatus)>,
}

impl IndexOutcome {
    pub fn created(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(_, s)| *s == IndexStatus::Created)
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn warnings(&self, table: &str) -> Vec<Warning> {
        self.columns
            .iter()
            .filter_map(|(column, status)| match status {
                IndexStatus::Created => None,
                IndexStatus::Skipped(reason) | IndexStatus::Failed(reason) => {
                    Some(Warning::IndexCreationFailed {
                        table: table.to_string(),
                        column: column.clone(),
                        reason: reason.clone(),
                    })
                }
            })
            .collect()
    }
}

/// Owns the staging tables of the runs using one landing database.
///
/// Tables are never dropped here; that is the sweep's job.
pub struct StagingManager {
    landing: Arc<dyn Database>,
    catalog: StagingCatalog,
    clock: Arc<dyn Clock>,
    retention: ChronoDuration,
    batch_size: usize,
    policy: RetryPolicy,
    live: DashMap<String, Uuid>,
}

impl std::fmt::Debug for StagingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingManager")
            .field("catalog", &self.catalog.table())
            .field("retention", &self.retention)
            .field("live", &self.live.len())
            .finish()
    }
}

impl StagingManager {
    /// Attach to a landing database, creating the catalog if needed.
    pub async fn open(
        landing: Arc<dyn Database>,
        config: &RunConfig,
        clock: Arc<dyn Clock>,
    ) -> StagingResult<Self> {
        let policy = RetryPolicy::from_run_config(config);
        let catalog = StagingCatalog::new(landing.clone(), &config.catalog_table, policy.clone());
        catalog.ensure().await?;
        let retention = ChronoDuration::from_std(config.retention)
            .map_err(|e| StagingError::Catalog(format!("retention out of range: {e}")))?;
        Ok(Self {
            landing,
            catalog,
            clock,
            retention,
            batch_size: config.insert_batch_size,
            policy,
            live: DashMap::new(),
        })
    }

    pub fn landing(&self) -> &Arc<dyn Database> {
        &self.landing
    }

    pub fn catalog(&self) -> &StagingCatalog {
        &self.catalog
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create an empty staging table for one extracted slice.
    ///
    /// The catalog row goes in before the DDL so a table is never left
    /// behind without a record the sweep can find.
    pub async fn create(
        &self,
        execution_id: Uuid,
        role: StagingRole,
        ordinal: usize,
        origin_table: &str,
        columns: &[ColumnSchema],
    ) -> StagingResult<StagingTable> {
        let now = self.clock.now();
        let name = staging_table_name(&execution_id, role, ordinal, now);

        match self.live.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StagingError::NameCollision(name));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(execution_id);
            }
        }

        let result = self
            .create_registered(&name, execution_id, role, ordinal, origin_table, columns, now)
            .await;
        if result.is_err() {
            self.live.remove(&name);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_registered(
        &self,
        name: &str,
        execution_id: Uuid,
        role: StagingRole,
        ordinal: usize,
        origin_table: &str,
        columns: &[ColumnSchema],
        now: chrono::DateTime<chrono::Utc>,
    ) -> StagingResult<StagingTable> {
        if self.catalog.get(name).await?.is_some() {
            return Err(StagingError::NameCollision(name.to_string()));
        }

        let table = StagingTable {
            name: name.to_string(),
            execution_id,
            role,
            ordinal,
            origin_table: origin_table.to_string(),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            row_count: 0,
            size_estimate: 0,
            created_at: now,
            ttl_expires_at: now + self.retention,
            indexes_created: Vec::new(),
            state: StagingState::Created,
        };
        self.catalog.insert(&table).await?;

        let ddl = CreateTable::new(name)
            .columns(
                columns
                    .iter()
                    .map(|c| ColumnDef::new(&c.name, c.column_type())),
            )
            .to_sql(self.landing.dialect());
        let landing = &self.landing;
        self.policy
            .single_attempt()
            .call("create staging table", || landing.execute(&ddl))
            .await?;

        tracing::info!(
            execution_id = %execution_id,
            table = %name,
            origin = %origin_table,
            role = role.as_str(),
            "created staging table"
        );
        Ok(table)
    }

    /// Load rows, preferring the landing database's bulk path.
    ///
    /// Writes are not retried; a timed-out INSERT may have landed.
    pub async fn load(&self, table: &mut StagingTable, rows: Vec<Vec<Value>>) -> StagingResult<LoadOutcome> {
        let write = self.policy.single_attempt();
        let landing = &self.landing;
        let columns = table.columns.clone();
        let name = table.name.clone();

        let status = write
            .call("bulk load", || landing.bulk_load(&name, &columns, &rows))
            .await?;

        let outcome = match status {
            BulkLoadStatus::Loaded(n) => LoadOutcome::Bulk { rows: n },
            BulkLoadStatus::Unavailable(reason) => {
                tracing::warn!(table = %name, %reason, "bulk load unavailable, falling back to batched inserts");
                let statements = Insert::new(&name)
                    .columns(columns.iter().cloned())
                    .rows(rows.iter().cloned())
                    .to_sql_batches(landing.dialect(), self.batch_size);
                for sql in &statements {
                    write.call("batch insert", || landing.execute(sql)).await?;
                }
                LoadOutcome::Batched {
                    rows: rows.len() as u64,
                    statements: statements.len(),
                    reason,
                }
            }
        };

        table.row_count = outcome.rows();
        table.size_estimate = rows.iter().flatten().map(cell_size).sum();
        self.transition(table, StagingState::Loaded).await?;
        tracing::debug!(table = %name, rows = table.row_count, bytes = table.size_estimate, "loaded staging table");
        Ok(outcome)
    }

    /// Index each of `columns` on its own. Failures are recorded, not raised.
    pub async fn create_indexes(
        &self,
        table: &mut StagingTable,
        columns: &[ColumnSchema],
    ) -> StagingResult<IndexOutcome> {
        let dialect = self.landing.dialect();
        let landing = &self.landing;
        let write = self.policy.single_attempt();
        let mut seen = BTreeSet::new();
        let mut outcome = IndexOutcome::default();

        for column in columns {
            if !seen.insert(column.name.clone()) {
                continue;
            }
            if column.column_type().is_unbounded_text() && !dialect.can_index_unbounded_text() {
                let reason = format!("{} cannot index unbounded text column ({})", dialect, column.data_type);
                tracing::info!(table = %table.name, column = %column.name, "skipping index: {}", reason);
                outcome.columns.push((column.name.clone(), IndexStatus::Skipped(reason)));
                continue;
            }

            let sql = CreateIndex::new(index_name(&table.name, &column.name), &table.name)
                .column(&column.name)
                .to_sql(dialect);
            match write.call("create index", || landing.execute(&sql)).await {
                Ok(_) => outcome.columns.push((column.name.clone(), IndexStatus::Created)),
                Err(e) => {
                    tracing::warn!(table = %table.name, column = %column.name, error = %e, "index creation failed, continuing without it");
                    outcome
                        .columns
                        .push((column.name.clone(), IndexStatus::Failed(e.to_string())));
                }
            }
        }

        table.indexes_created = outcome.created();
        self.transition(table, StagingState::Indexed).await?;
        Ok(outcome)
    }

    /// Move `table` to `next`, refreshing its TTL, and record it in the catalog.
    pub async fn transition(&self, table: &mut StagingTable, next: StagingState) -> StagingResult<()> {
        if !table.state.can_transition_to(next) {
            return Err(StagingError::InvalidTransition {
                table: table.name.clone(),
                from: table.state,
                to: next,
            });
        }
        let previous = table.state;
        table.state = next;
        if !next.is_terminal() {
            table.ttl_expires_at = self.clock.now() + self.retention;
        }
        self.catalog.update(table).await?;
        tracing::debug!(table = %table.name, from = %previous, to = %next, "staging state change");
        Ok(())
    }

    /// Move every table of a finished (or stopped) run to `RETAINED`.
    ///
    /// Catalog failures here become warnings; the run's outcome stands.
    pub async fn retain_all(&self, tables: &mut [StagingTable]) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for table in tables.iter_mut() {
            if table.state == StagingState::Retained || table.state.is_terminal() {
                continue;
            }
            if let Err(e) = self.transition(table, StagingState::Retained).await {
                tracing::warn!(table = %table.name, error = %e, "could not mark staging table retained");
                warnings.push(Warning::StagingCatalog {
                    table: table.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
        warnings
    }

    /// Forget the live names of a run. The tables themselves stay until swept.
    pub fn release(&self, execution_id: &Uuid) {
        self.live.retain(|_, owner| owner != execution_id);
    }

    /// Number of live table names held by in-flight runs.
    pub fn live_tables(&self) -> usize {
        self.live.len()
    }
}

fn cell_size(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len() as u64,
        other => other.to_string().len() as u64,
    }
}
