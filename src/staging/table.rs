//! Staging table records and naming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::StagingState;
use crate::hash::short_hash;

/// Which side of the reconciliation a staged slice came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingRole {
    Source,
    Target,
}

impl StagingRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingRole::Source => "source",
            StagingRole::Target => "target",
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            StagingRole::Source => "src",
            StagingRole::Target => "tgt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source" => Some(StagingRole::Source),
            "target" => Some(StagingRole::Target),
            _ => None,
        }
    }
}

/// `stg_{execution}_{src|tgt}{ordinal}_{yyyymmddHHMMSS}`.
///
/// The execution id alone makes names unique across runs; role and ordinal
/// separate the tables of one run.
pub fn staging_table_name(
    execution_id: &Uuid,
    role: StagingRole,
    ordinal: usize,
    created_at: DateTime<Utc>,
) -> String {
    format!(
        "stg_{}_{}{}_{}",
        execution_id.simple(),
        role.tag(),
        ordinal,
        created_at.format("%Y%m%d%H%M%S")
    )
}

/// Index name for one staged column.
pub fn index_name(table: &str, column: &str) -> String {
    format!("ix_{}", short_hash(&format!("{table}.{column}")))
}

/// A staging table owned by one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingTable {
    pub name: String,
    pub execution_id: Uuid,
    pub role: StagingRole,
    pub ordinal: usize,
    /// Source or target table the slice was extracted from.
    pub origin_table: String,
    pub columns: Vec<String>,
    pub row_count: u64,
    /// Approximate payload size in bytes.
    pub size_estimate: u64,
    pub created_at: DateTime<Utc>,
    pub ttl_expires_at: DateTime<Utc>,
    /// Columns that received an index. May be a subset of those attempted.
    pub indexes_created: Vec<String>,
    pub state: StagingState,
}

impl StagingTable {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ttl_expires_at < now
    }
}
