//! Federated matching.
//!
//! Source and target may live in different databases, so no single query can
//! join them. Each side returns its distinct join keys with a row count per
//! key, and the engine compares the two key sets. Keys are compared by their
//! canonical text, so `42` from one driver equals `42.0` from another.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::db::{Database, DbResult, QueryRows, RetryPolicy};
use crate::rules::{Predicate, ReconciliationRule};

use super::sql::{count_sql, key_groups_sql, SummaryCounts};

type KeyCounts = HashMap<Vec<String>, u64>;

struct SideResult {
    total: u64,
    keys: KeyCounts,
}

/// Counts for one rule, from per-side queries.
pub(crate) async fn summarize_rule(
    rule: &ReconciliationRule,
    source: &dyn Database,
    target: &dyn Database,
    policy: &RetryPolicy,
) -> DbResult<SummaryCounts> {
    let source_side = side(
        source,
        &rule.source_table,
        &rule.source_columns,
        rule,
        &rule.filter_conditions.source,
        policy,
    );
    let target_side = side(
        target,
        &rule.target_table,
        &rule.target_columns,
        rule,
        &rule.filter_conditions.target,
        policy,
    );
    let (source_side, target_side) = tokio::try_join!(source_side, target_side)?;

    let matched = matched_rows(&source_side.keys, &target_side.keys);
    let matched_target = matched_rows(&target_side.keys, &source_side.keys);
    Ok(SummaryCounts {
        total_source: source_side.total,
        total_target: target_side.total,
        matched,
        unmatched_source: source_side.total.saturating_sub(matched),
        unmatched_target: target_side.total.saturating_sub(matched_target),
    })
}

async fn side(
    db: &dyn Database,
    table: &str,
    columns: &[String],
    rule: &ReconciliationRule,
    filters: &BTreeMap<String, Predicate>,
    policy: &RetryPolicy,
) -> DbResult<SideResult> {
    let dialect = db.dialect();
    let groups_sql = key_groups_sql(table, columns, rule.match_type, filters, dialect);
    let total_sql = count_sql(table, filters, dialect);

    let total = policy
        .call("count rows", || db.query(&total_sql))
        .await?
        .get_u64(0, "n")?;
    let groups = policy.call("group keys", || db.query(&groups_sql)).await?;
    tracing::debug!(
        rule_id = %rule.rule_id,
        table = %table,
        rows = total,
        distinct_keys = groups.len(),
        "collected key groups"
    );
    Ok(SideResult {
        total,
        keys: key_counts(&groups, columns.len())?,
    })
}

fn key_counts(groups: &QueryRows, arity: usize) -> DbResult<KeyCounts> {
    let mut keys = KeyCounts::with_capacity(groups.len());
    for (row, cells) in groups.rows.iter().enumerate() {
        let Some(key) = cells
            .iter()
            .take(arity)
            .map(canonical_text)
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        let n = groups.get_u64(row, "n")?;
        *keys.entry(key).or_default() += n;
    }
    Ok(keys)
}

fn matched_rows(side: &KeyCounts, other: &KeyCounts) -> u64 {
    side.iter()
        .filter(|(key, _)| other.contains_key(*key))
        .map(|(_, n)| n)
        .sum()
}

/// Driver-independent text for a key cell. NULL has none and never matches.
pub(crate) fn canonical_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
            _ => n.to_string(),
        }),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
