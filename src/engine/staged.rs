//! Staged matching.
//!
//! Extraction runs once per run, source and target in parallel. Each slice
//! becomes a staging table; every rule then runs a single summary query in
//! the landing database.

use std::collections::HashMap;

use uuid::Uuid;

use crate::db::{ColumnSchema, Database, DbError, DbResult, QueryRows, RetryPolicy};
use crate::rules::ReconciliationRule;
use crate::staging::{StagingError, StagingManager, StagingRole, StagingState, StagingTable};
use crate::warning::Warning;

use super::plan::{ExtractionPlan, ResolvedRule, Slice};
use super::record::PipelineStep;
use super::sql::{select_columns_sql, summary_sql, SummaryCounts};
use super::StepError;

/// Rows extracted for each slice of a plan, in plan order.
#[derive(Debug, Default)]
pub(crate) struct Extracted {
    pub source: Vec<QueryRows>,
    pub target: Vec<QueryRows>,
}

impl Extracted {
    pub fn rows(&self) -> usize {
        self.source.iter().chain(&self.target).map(QueryRows::len).sum()
    }
}

pub(crate) async fn extract(
    plan: &ExtractionPlan,
    source: &dyn Database,
    target: &dyn Database,
    policy: &RetryPolicy,
) -> Result<Extracted, StepError> {
    let (source_rows, target_rows) = tokio::try_join!(
        extract_side(source, &plan.source, policy),
        extract_side(target, &plan.target, policy)
    )
    .map_err(|e| StepError::new(PipelineStep::Extract, e))?;
    Ok(Extracted {
        source: source_rows,
        target: target_rows,
    })
}

async fn extract_side(db: &dyn Database, slices: &[Slice], policy: &RetryPolicy) -> DbResult<Vec<QueryRows>> {
    let mut extracted = Vec::with_capacity(slices.len());
    for slice in slices {
        let sql = select_columns_sql(&slice.origin_table, &slice.column_names(), db.dialect());
        let rows = policy.call("extract", || db.query(&sql)).await?;
        tracing::info!(
            table = %slice.origin_table,
            role = slice.role.as_str(),
            rows = rows.len(),
            "extracted slice"
        );
        extracted.push(rows);
    }
    Ok(extracted)
}

/// Staging tables of one run, looked up by side and origin table.
#[derive(Debug, Default)]
pub(crate) struct StagedTables {
    tables: Vec<StagingTable>,
    by_origin: HashMap<(StagingRole, String), usize>,
}

impl StagedTables {
    fn push(&mut self, table: StagingTable) -> usize {
        let idx = self.tables.len();
        self.by_origin
            .insert((table.role, table.origin_table.clone()), idx);
        self.tables.push(table);
        idx
    }

    pub fn name_for(&self, role: StagingRole, origin_table: &str) -> Option<&str> {
        self.by_origin
            .get(&(role, origin_table.to_string()))
            .map(|&i| self.tables[i].name.as_str())
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn tables_mut(&mut self) -> &mut [StagingTable] {
        &mut self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Create, load and index one staging table per slice.
///
/// Tables are registered in `staged` as soon as they exist, so a failure
/// part-way still leaves every created table visible to the caller.
pub(crate) async fn stage(
    manager: &StagingManager,
    execution_id: Uuid,
    plan: &ExtractionPlan,
    extracted: Extracted,
    rules: &[ResolvedRule],
    staged: &mut StagedTables,
    warnings: &mut Vec<Warning>,
) -> Result<(), StepError> {
    let fail = |e: StagingError| StepError::new(PipelineStep::Stage, e);
    let work = plan
        .source
        .iter()
        .zip(extracted.source)
        .chain(plan.target.iter().zip(extracted.target));

    for (slice, rows) in work {
        let table = manager
            .create(execution_id, slice.role, slice.ordinal, &slice.origin_table, &slice.columns)
            .await
            .map_err(fail)?;
        let idx = staged.push(table);
        let table = &mut staged.tables[idx];

        let load = manager.load(table, rows.rows).await.map_err(fail)?;
        warnings.extend(load.warning(&table.name));

        let keys = index_columns(rules, slice);
        let indexes = manager.create_indexes(table, &keys).await.map_err(fail)?;
        warnings.extend(indexes.warnings(&table.name));
    }
    Ok(())
}

/// Join columns of every rule reading `slice`, first use first.
fn index_columns(rules: &[ResolvedRule], slice: &Slice) -> Vec<ColumnSchema> {
    let mut columns: Vec<ColumnSchema> = Vec::new();
    for resolved in rules {
        let table = match slice.role {
            StagingRole::Source => &resolved.rule.source_table,
            StagingRole::Target => &resolved.rule.target_table,
        };
        if *table != slice.origin_table {
            continue;
        }
        for column in resolved.key_schemas(slice.role) {
            if !columns.iter().any(|c| c.name == column.name) {
                columns.push(column);
            }
        }
    }
    columns
}

/// Counts for one rule from its staged copies.
pub(crate) async fn summarize_rule(
    landing: &dyn Database,
    rule: &ReconciliationRule,
    staged: &StagedTables,
    policy: &RetryPolicy,
) -> DbResult<SummaryCounts> {
    let missing = |role: StagingRole, table: &str| {
        DbError::Internal(format!("no staged copy of {} table {}", role.as_str(), table))
    };
    let source = staged
        .name_for(StagingRole::Source, &rule.source_table)
        .ok_or_else(|| missing(StagingRole::Source, &rule.source_table))?;
    let target = staged
        .name_for(StagingRole::Target, &rule.target_table)
        .ok_or_else(|| missing(StagingRole::Target, &rule.target_table))?;

    let sql = summary_sql(rule, landing.dialect(), source, target);
    let rows = policy.call("summary", || landing.query(&sql)).await?;
    SummaryCounts::from_rows(&rows)
}

/// Move every staged table to `QUERIED`. Catalog failures become warnings.
pub(crate) async fn mark_queried(manager: &StagingManager, staged: &mut StagedTables) -> Vec<Warning> {
    let mut warnings = Vec::new();
    for table in staged.tables_mut() {
        if table.state != StagingState::Indexed {
            continue;
        }
        if let Err(e) = manager.transition(table, StagingState::Queried).await {
            tracing::warn!(table = %table.name, error = %e, "could not mark staging table queried");
            warnings.push(Warning::StagingCatalog {
                table: table.name.clone(),
                reason: e.to_string(),
            });
        }
    }
    warnings
}
