//! Rule resolution, mode selection and the extraction plan.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ModePreference;
use crate::db::{ColumnSchema, Database, DbError, RetryPolicy, TableSchema};
use crate::rules::{Predicate, ReconciliationRule};
use crate::staging::StagingRole;
use crate::warning::Warning;

use super::record::{ExecutionMode, PipelineStep};
use super::StepError;

/// A rule whose column names match the live schemas exactly.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedRule {
    pub rule: ReconciliationRule,
    pub source_schema: TableSchema,
    pub target_schema: TableSchema,
}

impl ResolvedRule {
    /// Columns the rule reads on one side: keys first, then filter columns.
    pub fn columns_for(&self, role: StagingRole) -> Vec<&str> {
        let (keys, filters) = match role {
            StagingRole::Source => (&self.rule.source_columns, &self.rule.filter_conditions.source),
            StagingRole::Target => (&self.rule.target_columns, &self.rule.filter_conditions.target),
        };
        keys.iter().chain(filters.keys()).map(String::as_str).collect()
    }

    pub fn key_schemas(&self, role: StagingRole) -> Vec<ColumnSchema> {
        let (schema, keys) = match role {
            StagingRole::Source => (&self.source_schema, &self.rule.source_columns),
            StagingRole::Target => (&self.target_schema, &self.rule.target_columns),
        };
        keys.iter().filter_map(|k| schema.find(k).cloned()).collect()
    }
}

/// Check every rule against the live schemas and canonicalise column names.
///
/// Each table is described once per side.
pub(crate) async fn resolve_rules(
    rules: &[ReconciliationRule],
    source: &dyn Database,
    target: &dyn Database,
    policy: &RetryPolicy,
) -> Result<Vec<ResolvedRule>, StepError> {
    let mut source_schemas: BTreeMap<String, TableSchema> = BTreeMap::new();
    let mut target_schemas: BTreeMap<String, TableSchema> = BTreeMap::new();
    let mut resolved = Vec::with_capacity(rules.len());

    for rule in rules {
        let fail = |e: DbError| StepError::for_rule(PipelineStep::Init, &rule.rule_id, e);

        let source_schema = describe(source, &rule.source_table, &mut source_schemas, policy)
            .await
            .map_err(fail)?;
        let target_schema = describe(target, &rule.target_table, &mut target_schemas, policy)
            .await
            .map_err(fail)?;

        let mut canonical = rule.clone();
        canonical.source_columns = canonical_names(&source_schema, &rule.source_columns).map_err(fail)?;
        canonical.target_columns = canonical_names(&target_schema, &rule.target_columns).map_err(fail)?;
        canonical.filter_conditions.source =
            canonical_filters(&source_schema, &rule.filter_conditions.source).map_err(fail)?;
        canonical.filter_conditions.target =
            canonical_filters(&target_schema, &rule.filter_conditions.target).map_err(fail)?;

        resolved.push(ResolvedRule {
            rule: canonical,
            source_schema,
            target_schema,
        });
    }
    Ok(resolved)
}

async fn describe(
    db: &dyn Database,
    table: &str,
    cache: &mut BTreeMap<String, TableSchema>,
    policy: &RetryPolicy,
) -> Result<TableSchema, DbError> {
    if let Some(schema) = cache.get(table) {
        return Ok(schema.clone());
    }
    let schema = policy.call("describe table", || db.table_schema(table)).await?;
    cache.insert(table.to_string(), schema.clone());
    Ok(schema)
}

fn canonical_names(schema: &TableSchema, names: &[String]) -> Result<Vec<String>, DbError> {
    schema.require_columns(names)?;
    Ok(names
        .iter()
        .filter_map(|n| schema.find(n).map(|c| c.name.clone()))
        .collect())
}

fn canonical_filters(
    schema: &TableSchema,
    filters: &BTreeMap<String, Predicate>,
) -> Result<BTreeMap<String, Predicate>, DbError> {
    schema.require_columns(filters.keys())?;
    Ok(filters
        .iter()
        .filter_map(|(column, predicate)| {
            schema
                .find(column)
                .map(|c| (c.name.clone(), predicate.clone()))
        })
        .collect())
}

/// Mode for a run, and the warning when a forced mode cannot be honoured.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ModeChoice {
    pub mode: ExecutionMode,
    pub warning: Option<Warning>,
}

pub(crate) async fn choose_mode(
    preference: ModePreference,
    has_landing: bool,
    threshold: u64,
    rules: &[ResolvedRule],
    source: &dyn Database,
    target: &dyn Database,
    policy: &RetryPolicy,
) -> ModeChoice {
    let federated = ModeChoice {
        mode: ExecutionMode::Federated,
        warning: None,
    };
    match preference {
        ModePreference::Federated => federated,
        ModePreference::Staged if has_landing => ModeChoice {
            mode: ExecutionMode::Staged,
            warning: None,
        },
        ModePreference::Staged => ModeChoice {
            mode: ExecutionMode::Federated,
            warning: Some(Warning::ModeFallback {
                requested: ExecutionMode::Staged.to_string(),
                reason: "no landing database configured".to_string(),
            }),
        },
        ModePreference::Auto if !has_landing => federated,
        ModePreference::Auto => {
            let largest = largest_estimate(rules, source, target, policy).await;
            tracing::debug!(largest_estimate = ?largest, threshold, "choosing execution mode");
            match largest {
                Some(rows) if rows > threshold => ModeChoice {
                    mode: ExecutionMode::Staged,
                    warning: None,
                },
                _ => federated,
            }
        }
    }
}

/// Largest row estimate across the tables the rules touch, if any succeeded.
async fn largest_estimate(
    rules: &[ResolvedRule],
    source: &dyn Database,
    target: &dyn Database,
    policy: &RetryPolicy,
) -> Option<u64> {
    let source_tables: BTreeSet<&str> = rules.iter().map(|r| r.rule.source_table.as_str()).collect();
    let target_tables: BTreeSet<&str> = rules.iter().map(|r| r.rule.target_table.as_str()).collect();

    let mut largest = None;
    let sides = [(source, source_tables), (target, target_tables)];
    for (db, tables) in &sides {
        for table in tables {
            match policy.call("estimate rows", || db.estimate_row_count(table)).await {
                Ok(n) => largest = Some(largest.map_or(n, |m: u64| m.max(n))),
                Err(e) => tracing::warn!(table = %table, error = %e, "row estimate unavailable"),
            }
        }
    }
    largest
}

/// One table to extract for a staged run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Slice {
    pub role: StagingRole,
    pub ordinal: usize,
    pub origin_table: String,
    /// Columns to extract, in schema order.
    pub columns: Vec<ColumnSchema>,
}

impl Slice {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Every distinct table per side, each extracted once for all rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ExtractionPlan {
    pub source: Vec<Slice>,
    pub target: Vec<Slice>,
}

impl ExtractionPlan {
    pub fn build(rules: &[ResolvedRule]) -> Self {
        Self {
            source: slices(rules, StagingRole::Source),
            target: slices(rules, StagingRole::Target),
        }
    }

    pub fn slices(&self) -> impl Iterator<Item = &Slice> {
        self.source.iter().chain(&self.target)
    }
}

fn slices(rules: &[ResolvedRule], role: StagingRole) -> Vec<Slice> {
    let mut wanted: BTreeMap<&str, (&TableSchema, BTreeSet<&str>)> = BTreeMap::new();
    for resolved in rules {
        let (table, schema) = match role {
            StagingRole::Source => (&resolved.rule.source_table, &resolved.source_schema),
            StagingRole::Target => (&resolved.rule.target_table, &resolved.target_schema),
        };
        wanted
            .entry(table.as_str())
            .or_insert_with(|| (schema, BTreeSet::new()))
            .1
            .extend(resolved.columns_for(role));
    }

    wanted
        .into_iter()
        .enumerate()
        .map(|(ordinal, (table, (schema, columns)))| Slice {
            role,
            ordinal,
            origin_table: table.to_string(),
            columns: schema
                .columns
                .iter()
                .filter(|c| columns.contains(c.name.as_str()))
                .cloned()
                .collect(),
        })
        .collect()
}
