use serde::{Deserialize, Serialize};

use crate::db::{Database, DbResult, QueryRows, RetryPolicy};
use crate::rules::ReconciliationRule;
use crate::sql::SqlDialect;

use super::sql::export_rule_sql;

/// Which row set of a rule to preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewKind {
    Matched,
    UnmatchedSource,
    UnmatchedTarget,
}

/// Run one of a rule's row queries with a row limit.
///
/// Both tables must be reachable from `db`: a single database holding
/// source and target, or a landing database with the rule rewritten onto
/// staged copies.
pub async fn preview_rule(
    db: &dyn Database,
    rule: &ReconciliationRule,
    kind: PreviewKind,
    limit: u64,
    policy: &RetryPolicy,
) -> DbResult<QueryRows> {
    let dialect = db.dialect();
    let statements = export_rule_sql(rule, dialect);
    let select = match kind {
        PreviewKind::Matched => statements.matched,
        PreviewKind::UnmatchedSource => statements.unmatched_source,
        PreviewKind::UnmatchedTarget => statements.unmatched_target,
    };
    let sql = dialect.limit_rows(&select, limit);
    tracing::debug!(rule_id = %rule.rule_id, ?kind, limit, "previewing rule");
    policy.call("preview", || db.query(&sql)).await
}
