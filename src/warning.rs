//! Recovered conditions recorded on rulesets and execution records.
//!
//! None of these abort a run. They are reported so a caller can tell a
//! degraded run from a clean one.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Landing database had no bulk path; rows went in through batched INSERTs.
    BulkLoadUnavailable { table: String, reason: String },

    /// An index on a staging table was skipped or failed to build.
    IndexCreationFailed {
        table: String,
        column: String,
        reason: String,
    },

    /// The rule enhancer failed or timed out; the ruleset is pattern-only.
    EnhancerUnavailable { reason: String },

    /// An enhancer candidate was malformed and dropped.
    EnhancerCandidateRejected { reason: String },

    /// The requested execution mode could not be honoured.
    ModeFallback { requested: String, reason: String },

    /// A staging catalog update failed; the table keeps its previous state.
    StagingCatalog { table: String, reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::BulkLoadUnavailable { table, reason } => {
                write!(f, "bulk load unavailable for {table}: {reason}")
            }
            Warning::IndexCreationFailed {
                table,
                column,
                reason,
            } => write!(f, "index on {table}.{column} not created: {reason}"),
            Warning::EnhancerUnavailable { reason } => write!(f, "rule enhancer unavailable: {reason}"),
            Warning::EnhancerCandidateRejected { reason } => {
                write!(f, "enhancer candidate rejected: {reason}")
            }
            Warning::ModeFallback { requested, reason } => {
                write!(f, "{requested} mode not used: {reason}")
            }
            Warning::StagingCatalog { table, reason } => {
                write!(f, "staging catalog update for {table} failed: {reason}")
            }
        }
    }
}
