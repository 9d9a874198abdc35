//! Pluggable source of additional (semantic) rule candidates.
//!
//! The engine never trusts an enhancer: calls are bounded by a timeout,
//! every candidate is validated against the schemas, origin is forced to
//! `llm`, and at most `enhancer_cap` candidates per table pair survive.
//! Failure of any kind degrades to a pattern-only ruleset plus a warning.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{rule_order, ReconciliationRule, RuleOrigin};
use crate::config::RuleConfig;
use crate::db::TableSchema;
use crate::warning::Warning;

pub type EnhancerResult<T> = Result<T, EnhancerError>;

#[derive(Error, Debug)]
pub enum EnhancerError {
    #[error("enhancer unavailable: {0}")]
    Unavailable(String),

    #[error("enhancer timed out after {0} ms")]
    Timeout(u64),

    #[error("malformed enhancer response: {0}")]
    Malformed(String),
}

/// A known relationship passed through to the enhancer as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipHint {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    #[serde(default)]
    pub description: String,
}

/// What an enhancer is asked about.
#[derive(Debug, Clone)]
pub struct EnhancementRequest {
    pub source: TableSchema,
    pub target: TableSchema,
    pub hints: Vec<RelationshipHint>,
}

#[async_trait]
pub trait RuleEnhancer: Send + Sync {
    fn name(&self) -> &str;

    async fn enhance(&self, request: &EnhancementRequest) -> EnhancerResult<Vec<ReconciliationRule>>;
}

/// Enhancer that proposes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnhancer;

#[async_trait]
impl RuleEnhancer for NoEnhancer {
    fn name(&self) -> &str {
        "none"
    }

    async fn enhance(&self, _request: &EnhancementRequest) -> EnhancerResult<Vec<ReconciliationRule>> {
        Ok(Vec::new())
    }
}

/// Enhancer backed by a JSON file of candidate rules (for instance, saved
/// output of an external proposer). The file is read on every call.
#[derive(Debug, Clone)]
pub struct StaticRuleEnhancer {
    path: PathBuf,
}

impl StaticRuleEnhancer {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl RuleEnhancer for StaticRuleEnhancer {
    fn name(&self) -> &str {
        "static-file"
    }

    async fn enhance(&self, _request: &EnhancementRequest) -> EnhancerResult<Vec<ReconciliationRule>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| EnhancerError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_str(&content).map_err(|e| EnhancerError::Malformed(e.to_string()))
    }
}

/// Accepted enhancer candidates plus any warnings raised along the way.
#[derive(Debug, Default)]
pub struct EnhancerOutcome {
    pub rules: Vec<ReconciliationRule>,
    pub warnings: Vec<Warning>,
}

/// Call the enhancer under `config.enhancer_timeout` and vet its candidates.
pub async fn collect_enhanced(
    enhancer: &dyn RuleEnhancer,
    request: &EnhancementRequest,
    config: &RuleConfig,
) -> EnhancerOutcome {
    let timeout = config.enhancer_timeout;
    let result = match tokio::time::timeout(timeout, enhancer.enhance(request)).await {
        Ok(r) => r,
        Err(_) => Err(EnhancerError::Timeout(timeout.as_millis() as u64)),
    };

    let candidates = match result {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(enhancer = enhancer.name(), error = %e, "rule enhancer failed, continuing with pattern rules");
            return EnhancerOutcome {
                rules: Vec::new(),
                warnings: vec![Warning::EnhancerUnavailable {
                    reason: e.to_string(),
                }],
            };
        }
    };

    let mut outcome = EnhancerOutcome::default();
    for mut candidate in candidates {
        match vet_candidate(&candidate, request) {
            Ok(()) => {
                candidate.origin = RuleOrigin::Llm;
                candidate.normalise_identity();
                outcome.rules.push(candidate);
            }
            Err(reason) => {
                tracing::debug!(%reason, "dropping enhancer candidate");
                outcome
                    .warnings
                    .push(Warning::EnhancerCandidateRejected { reason });
            }
        }
    }

    outcome.rules.sort_by(rule_order);
    if outcome.rules.len() > config.enhancer_cap {
        tracing::debug!(
            proposed = outcome.rules.len(),
            cap = config.enhancer_cap,
            "capping enhancer candidates"
        );
        outcome.rules.truncate(config.enhancer_cap);
    }
    outcome
}

fn vet_candidate(candidate: &ReconciliationRule, request: &EnhancementRequest) -> Result<(), String> {
    candidate.validate()?;
    if candidate.source_table != request.source.name || candidate.target_table != request.target.name {
        return Err(format!(
            "candidate targets {} -> {}, expected {} -> {}",
            candidate.source_table, candidate.target_table, request.source.name, request.target.name
        ));
    }
    request
        .source
        .require_columns(&candidate.source_columns)
        .and_then(|_| request.target.require_columns(&candidate.target_columns))
        .map_err(|e| e.to_string())
}
