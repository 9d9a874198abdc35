//! Join and aggregation SQL for rules.
//!
//! Four statements per rule:
//!
//! - **matched**: inner join on every column pair
//! - **unmatched_source**: source rows with no matching target row
//! - **unmatched_target**: the reverse
//! - **summary**: `total_source`, `total_target`, `matched_count`,
//!   `unmatched_source_count`, `unmatched_target_count` in one statement
//!
//! The summary joins each side against the DISTINCT key set of the other,
//! so a source row counts once however many target rows share its key.
//! NULL keys never match. `fuzzy` and `semantic` rules compare
//! `LOWER(TRIM(CAST(col AS text)))`.
//!
//! Everything here is pure text generation; nothing touches a database.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::db::{DbResult, QueryRows};
use crate::rules::{MatchType, Predicate, ReconciliationRule, RuleSet};
use crate::sql::{render_literal, Dialect, SqlDialect};

/// The four statements for one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSql {
    pub rule_id: String,
    pub rule_name: String,
    pub matched: String,
    pub unmatched_source: String,
    pub unmatched_target: String,
    pub summary: String,
}

/// SQL for a rule against its own source and target tables.
pub fn export_rule_sql(rule: &ReconciliationRule, dialect: Dialect) -> RuleSql {
    rule_sql_for_tables(rule, dialect, &rule.source_table, &rule.target_table)
}

/// SQL for every rule of a ruleset, in ruleset order.
pub fn export_ruleset_sql(ruleset: &RuleSet, dialect: Dialect) -> Vec<RuleSql> {
    ruleset
        .rules
        .iter()
        .map(|rule| export_rule_sql(rule, dialect))
        .collect()
}

/// SQL for a rule with its tables replaced (staged copies).
pub fn rule_sql_for_tables(
    rule: &ReconciliationRule,
    dialect: Dialect,
    source_table: &str,
    target_table: &str,
) -> RuleSql {
    let src = dialect.quote_qualified(source_table);
    let tgt = dialect.quote_qualified(target_table);
    let on = join_condition(rule, dialect);
    let source_filters = filter_clauses(Some("s"), &rule.filter_conditions.source, dialect);
    let target_filters = filter_clauses(Some("t"), &rule.filter_conditions.target, dialect);

    let both: Vec<String> = source_filters.iter().chain(&target_filters).cloned().collect();
    let matched = format!(
        "SELECT s.*, t.* FROM {src} AS s INNER JOIN {tgt} AS t ON {on}{}",
        where_clause(&both)
    );

    let unmatched_source = format!(
        "SELECT s.* FROM {src} AS s WHERE {}NOT EXISTS (SELECT 1 FROM {tgt} AS t WHERE {on}{})",
        leading_and(&source_filters),
        trailing_and(&target_filters)
    );

    let unmatched_target = format!(
        "SELECT t.* FROM {tgt} AS t WHERE {}NOT EXISTS (SELECT 1 FROM {src} AS s WHERE {on}{})",
        leading_and(&target_filters),
        trailing_and(&source_filters)
    );

    RuleSql {
        rule_id: rule.rule_id.clone(),
        rule_name: rule.rule_name.clone(),
        matched,
        unmatched_source,
        unmatched_target,
        summary: summary_sql(rule, dialect, source_table, target_table),
    }
}

/// One-pass counts for a rule.
pub fn summary_sql(
    rule: &ReconciliationRule,
    dialect: Dialect,
    source_table: &str,
    target_table: &str,
) -> String {
    let src = dialect.quote_qualified(source_table);
    let tgt = dialect.quote_qualified(target_table);
    let mt = rule.match_type;

    let source_side = side_counts(SideQuery {
        table: &src,
        alias: "s",
        columns: &rule.source_columns,
        filters: &rule.filter_conditions.source,
        other_table: &tgt,
        other_alias: "t",
        other_columns: &rule.target_columns,
        other_filters: &rule.filter_conditions.target,
        total_alias: "total_source",
        hit_alias: "matched_count",
        match_type: mt,
        dialect,
    });
    let target_side = side_counts(SideQuery {
        table: &tgt,
        alias: "t",
        columns: &rule.target_columns,
        filters: &rule.filter_conditions.target,
        other_table: &src,
        other_alias: "s",
        other_columns: &rule.source_columns,
        other_filters: &rule.filter_conditions.source,
        total_alias: "total_target",
        hit_alias: "matched_target",
        match_type: mt,
        dialect,
    });

    format!(
        "SELECT src_side.total_source, tgt_side.total_target, src_side.matched_count, \
         src_side.total_source - src_side.matched_count AS unmatched_source_count, \
         tgt_side.total_target - tgt_side.matched_target AS unmatched_target_count \
         FROM ({source_side}) AS src_side CROSS JOIN ({target_side}) AS tgt_side"
    )
}

struct SideQuery<'a> {
    table: &'a str,
    alias: &'a str,
    columns: &'a [String],
    filters: &'a BTreeMap<String, Predicate>,
    other_table: &'a str,
    other_alias: &'a str,
    other_columns: &'a [String],
    other_filters: &'a BTreeMap<String, Predicate>,
    total_alias: &'a str,
    hit_alias: &'a str,
    match_type: MatchType,
    dialect: Dialect,
}

fn side_counts(q: SideQuery<'_>) -> String {
    let keys: Vec<String> = q
        .other_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} AS k{i}", column_expr(None, c, q.match_type, q.dialect)))
        .collect();
    let key_set = format!(
        "SELECT DISTINCT {}, 1 AS rk_hit FROM {}{}",
        keys.join(", "),
        q.other_table,
        where_clause(&filter_clauses(None, q.other_filters, q.dialect))
    );
    let on: Vec<String> = q
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "{} = {}.k{i}",
                column_expr(Some(q.alias), c, q.match_type, q.dialect),
                q.other_alias
            )
        })
        .collect();
    format!(
        "SELECT COUNT(*) AS {}, COALESCE(SUM(CASE WHEN {}.rk_hit IS NULL THEN 0 ELSE 1 END), 0) AS {} \
         FROM {} AS {} LEFT JOIN ({key_set}) AS {} ON {}{}",
        q.total_alias,
        q.other_alias,
        q.hit_alias,
        q.table,
        q.alias,
        q.other_alias,
        on.join(" AND "),
        where_clause(&filter_clauses(Some(q.alias), q.filters, q.dialect))
    )
}

/// The five figures a summary query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryCounts {
    pub total_source: u64,
    pub total_target: u64,
    pub matched: u64,
    pub unmatched_source: u64,
    pub unmatched_target: u64,
}

impl SummaryCounts {
    /// Read the single row produced by [`summary_sql`].
    pub fn from_rows(rows: &QueryRows) -> DbResult<Self> {
        Ok(Self {
            total_source: rows.get_u64(0, "total_source")?,
            total_target: rows.get_u64(0, "total_target")?,
            matched: rows.get_u64(0, "matched_count")?,
            unmatched_source: rows.get_u64(0, "unmatched_source_count")?,
            unmatched_target: rows.get_u64(0, "unmatched_target_count")?,
        })
    }
}

/// Grouped key counts for one side of a rule, used when source and target
/// live in different databases: `k0..kN` plus `n` rows per key.
pub fn key_groups_sql(
    table: &str,
    columns: &[String],
    match_type: MatchType,
    filters: &BTreeMap<String, Predicate>,
    dialect: Dialect,
) -> String {
    let exprs: Vec<String> = columns
        .iter()
        .map(|c| column_expr(None, c, match_type, dialect))
        .collect();
    let selected: Vec<String> = exprs
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{e} AS k{i}"))
        .collect();
    let mut conditions = filter_clauses(None, filters, dialect);
    conditions.extend(
        columns
            .iter()
            .map(|c| format!("{} IS NOT NULL", dialect.quote_identifier(c))),
    );
    format!(
        "SELECT {}, COUNT(*) AS n FROM {}{} GROUP BY {}",
        selected.join(", "),
        dialect.quote_qualified(table),
        where_clause(&conditions),
        exprs.join(", ")
    )
}

/// Filtered row count for one side.
pub fn count_sql(table: &str, filters: &BTreeMap<String, Predicate>, dialect: Dialect) -> String {
    format!(
        "SELECT COUNT(*) AS n FROM {}{}",
        dialect.quote_qualified(table),
        where_clause(&filter_clauses(None, filters, dialect))
    )
}

/// Plain projection used to extract a slice for staging.
pub fn select_columns_sql(table: &str, columns: &[String], dialect: Dialect) -> String {
    let cols: Vec<String> = columns.iter().map(|c| dialect.quote_identifier(c)).collect();
    format!("SELECT {} FROM {}", cols.join(", "), dialect.quote_qualified(table))
}

fn join_condition(rule: &ReconciliationRule, dialect: Dialect) -> String {
    rule.source_columns
        .iter()
        .zip(&rule.target_columns)
        .map(|(s, t)| {
            format!(
                "{} = {}",
                column_expr(Some("s"), s, rule.match_type, dialect),
                column_expr(Some("t"), t, rule.match_type, dialect)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Comparison expression for a column.
pub fn column_expr(alias: Option<&str>, column: &str, match_type: MatchType, dialect: Dialect) -> String {
    let base = qualified_column(alias, column, dialect);
    if match_type.is_normalised() {
        format!("LOWER(TRIM({}))", dialect.cast_to_text(&base))
    } else {
        base
    }
}

fn qualified_column(alias: Option<&str>, column: &str, dialect: Dialect) -> String {
    match alias {
        Some(a) => format!("{}.{}", a, dialect.quote_identifier(column)),
        None => dialect.quote_identifier(column),
    }
}

/// Render one predicate on a column.
pub fn predicate_sql(alias: Option<&str>, column: &str, predicate: &Predicate, dialect: Dialect) -> String {
    let col = qualified_column(alias, column, dialect);
    let cmp = |op: &str, v: &Value| format!("{col} {op} {}", render_literal(v, dialect));
    match predicate {
        Predicate::Eq(Value::Null) | Predicate::IsNull => format!("{col} IS NULL"),
        Predicate::Ne(Value::Null) | Predicate::IsNotNull => format!("{col} IS NOT NULL"),
        Predicate::Eq(v) => cmp("=", v),
        Predicate::Ne(v) => cmp("<>", v),
        Predicate::Gt(v) => cmp(">", v),
        Predicate::Gte(v) => cmp(">=", v),
        Predicate::Lt(v) => cmp("<", v),
        Predicate::Lte(v) => cmp("<=", v),
        Predicate::In(values) if values.is_empty() => "1 = 0".to_string(),
        Predicate::In(values) => {
            let list: Vec<String> = values.iter().map(|v| render_literal(v, dialect)).collect();
            format!("{col} IN ({})", list.join(", "))
        }
    }
}

fn filter_clauses(
    alias: Option<&str>,
    filters: &BTreeMap<String, Predicate>,
    dialect: Dialect,
) -> Vec<String> {
    filters
        .iter()
        .map(|(column, predicate)| predicate_sql(alias, column, predicate, dialect))
        .collect()
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn leading_and(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("{} AND ", conditions.join(" AND "))
    }
}

fn trailing_and(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" AND {}", conditions.join(" AND "))
    }
}
