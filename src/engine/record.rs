//! Execution records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kpi::{KpiSnapshot, RuleCounts};
use crate::warning::Warning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Federated,
    Staged,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionMode::Federated => "federated",
            ExecutionMode::Staged => "staged",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    /// Stopped early; outcomes cover only the rules that ran.
    Partial,
    Failed,
}

/// Pipeline steps, in order. `Failed` is reachable from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStep {
    Init,
    Extract,
    Stage,
    Match,
    Aggregate,
    Persist,
    Done,
    Failed,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStep::Init => "INIT",
            PipelineStep::Extract => "EXTRACT",
            PipelineStep::Stage => "STAGE",
            PipelineStep::Match => "MATCH",
            PipelineStep::Aggregate => "AGGREGATE",
            PipelineStep::Persist => "PERSIST",
            PipelineStep::Done => "DONE",
            PipelineStep::Failed => "FAILED",
        })
    }
}

/// Counts for one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub rule_name: String,
    pub confidence_score: f64,
    pub total_source: u64,
    pub total_target: u64,
    pub matched_count: u64,
    pub unmatched_source_count: u64,
    pub unmatched_target_count: u64,
    pub elapsed_ms: u64,
}

impl RuleOutcome {
    pub fn counts(&self) -> RuleCounts {
        RuleCounts {
            matched: self.matched_count,
            total_source: self.total_source,
            confidence: self.confidence_score,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub extraction_ms: u64,
    /// Create, load and index (staged mode only).
    pub staging_ms: u64,
    pub join_ms: u64,
    pub total_ms: u64,
}

/// Where and why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub step: PipelineStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub ruleset_id: String,
    pub mode: ExecutionMode,
    pub status: ExecutionStatus,
    /// Last step reached.
    pub step: PipelineStep,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rules: Vec<RuleOutcome>,
    pub timing: Timing,
    pub kpi_snapshot: Option<KpiSnapshot>,
    /// Staging tables created by this run (staged mode).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub staging_tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl ExecutionRecord {
    pub fn new(execution_id: Uuid, ruleset_id: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            execution_id,
            ruleset_id: ruleset_id.into(),
            mode,
            status: ExecutionStatus::Running,
            step: PipelineStep::Init,
            started_at: Utc::now(),
            finished_at: None,
            rules: Vec::new(),
            timing: Timing::default(),
            kpi_snapshot: None,
            staging_tables: Vec::new(),
            warnings: Vec::new(),
            failure: None,
        }
    }

    pub fn total_matched(&self) -> u64 {
        self.rules.iter().map(|r| r.matched_count).sum()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}
