//! Ruleset execution.
//!
//! An execution walks `INIT → EXTRACT → (STAGE →) MATCH → AGGREGATE →
//! PERSIST → DONE`, with `FAILED` reachable from every step:
//!
//! - **federated**: each rule runs per-side key-group queries against the
//!   source and target databases and the engine compares the key sets
//! - **staged**: every table the ruleset needs is extracted once, loaded into
//!   the landing database, and each rule runs one summary query there
//!
//! [`ExecutionCoordinator`] owns the record for the whole run; nothing else
//! mutates it. KPIs are computed only once every rule has a summary.

mod cancel;
mod coordinator;
mod federated;
mod plan;
mod preview;
mod record;
mod sink;
pub mod sql;
mod staged;

pub use cancel::CancelHandle;
pub use coordinator::ExecutionCoordinator;
pub use preview::{preview_rule, PreviewKind};
pub use record::{
    ExecutionMode, ExecutionRecord, ExecutionStatus, FailureInfo, PipelineStep, RuleOutcome, Timing,
};
pub use sink::{JsonlResultSink, MemoryResultSink, ResultSink, SinkError, SinkResult};
pub use sql::{export_rule_sql, export_ruleset_sql, rule_sql_for_tables, RuleSql, SummaryCounts};

use thiserror::Error;

use crate::db::DbError;
use crate::staging::StagingError;

/// Why a run stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// A table or column a rule references does not exist.
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    /// Connection errors persisted through every retry.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("result sink failed: {0}")]
    Sink(String),

    #[error("staging failed: {0}")]
    Staging(String),

    /// A statement was rejected by the database.
    #[error("query failed: {0}")]
    Query(String),

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),
}

impl From<DbError> for FailureCause {
    fn from(err: DbError) -> Self {
        match err {
            DbError::TableNotFound(_) | DbError::ColumnNotFound { .. } => {
                Self::SchemaNotFound(err.to_string())
            }
            DbError::Timeout(ms) => Self::Timeout(ms),
            e if e.is_retriable() => Self::Connection(e.to_string()),
            e => Self::Query(e.to_string()),
        }
    }
}

impl From<StagingError> for FailureCause {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::Db(e) => e.into(),
            other => Self::Staging(other.to_string()),
        }
    }
}

impl From<SinkError> for FailureCause {
    fn from(err: SinkError) -> Self {
        Self::Sink(err.to_string())
    }
}

/// A run that did not complete.
///
/// `record` is the execution record as persisted: `failed` for errors,
/// `partial` for cancellation.
#[derive(Error, Debug)]
#[error(
    "execution failed at {step}{}: {cause}",
    .rule_id.as_deref().map(|r| format!(" (rule {r})")).unwrap_or_default()
)]
pub struct ExecutionFailure {
    pub step: PipelineStep,
    pub rule_id: Option<String>,
    pub cause: FailureCause,
    pub record: Box<ExecutionRecord>,
}

/// Failure of one step, before the coordinator wraps it with the record.
#[derive(Debug)]
pub(crate) struct StepError {
    pub step: PipelineStep,
    pub rule_id: Option<String>,
    pub cause: FailureCause,
}

impl StepError {
    pub fn new(step: PipelineStep, cause: impl Into<FailureCause>) -> Self {
        Self {
            step,
            rule_id: None,
            cause: cause.into(),
        }
    }

    pub fn for_rule(step: PipelineStep, rule_id: &str, cause: impl Into<FailureCause>) -> Self {
        Self {
            step,
            rule_id: Some(rule_id.to_string()),
            cause: cause.into(),
        }
    }
}
