//! Rule generation, filtering and persistence.
//!
//! ```text
//! schemas ──► generator (pattern) ──┐
//!         └─► enhancer (llm, capped) ┼─► filter ──► RuleSet ──► store
//! explicit pairs ───────────────────┘
//! ```
//!
//! Everything up to the [`RuleSet`] is deterministic for a given schema pair,
//! configuration and enhancer output; compare [`RuleSet::fingerprint`] across
//! runs rather than the generated id.

mod enhancer;
mod filter;
mod generator;
mod inflection;
mod model;
mod store;

pub use enhancer::{
    collect_enhanced, EnhancementRequest, EnhancerError, EnhancerOutcome, EnhancerResult,
    NoEnhancer, RelationshipHint, RuleEnhancer, StaticRuleEnhancer,
};
pub use filter::filter_rules;
pub use generator::{
    explicit_pair_rules, generate_candidates, name_similarity, ExplicitPair, SimilarityTier,
};
pub use inflection::{normalise, singularize, tokens};
pub use model::{
    rule_order, FilterConditions, MatchType, Predicate, ReconciliationRule, RuleOrigin, RuleSet,
    Signature,
};
pub use store::{
    FileRulesetStore, MemoryRulesetStore, RulesetStore, RulesetSummary, SqliteRulesetStore,
    StoreError, StoreResult,
};

use thiserror::Error;

use crate::config::RuleConfig;
use crate::db::TableSchema;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("invalid rule configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RuleResult<T> = Result<T, RuleError>;

/// Build the ruleset for one schema pair.
///
/// Explicit pairs, pattern candidates and vetted enhancer candidates are
/// merged and passed through [`filter_rules`]. Enhancer problems end up in
/// `RuleSet::warnings`; only bad explicit pairs or configuration fail.
pub async fn build_ruleset(
    source: &TableSchema,
    target: &TableSchema,
    explicit_pairs: &[ExplicitPair],
    enhancer: &dyn RuleEnhancer,
    hints: Vec<RelationshipHint>,
    config: &RuleConfig,
) -> RuleResult<RuleSet> {
    config.validate().map_err(RuleError::InvalidConfig)?;

    let mut candidates = explicit_pair_rules(source, target, explicit_pairs)?;
    candidates.extend(generate_candidates(source, target, config));

    let request = EnhancementRequest {
        source: source.clone(),
        target: target.clone(),
        hints,
    };
    let enhanced = collect_enhanced(enhancer, &request, config).await;
    candidates.extend(enhanced.rules);

    let rules = filter_rules(candidates, config);
    let ruleset = RuleSet::new(&source.name, &target.name, rules, enhanced.warnings)?;

    tracing::info!(
        ruleset_id = %ruleset.ruleset_id,
        source = %source.name,
        target = %target.name,
        rules = ruleset.len(),
        warnings = ruleset.warnings.len(),
        "built ruleset"
    );
    Ok(ruleset)
}
