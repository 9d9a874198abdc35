//! Pattern-based rule candidates from column-name similarity.
//!
//! Every (source column, target column) pair is scored once:
//!
//! | Tier    | Condition                                                   | Confidence            |
//! |---------|-------------------------------------------------------------|-----------------------|
//! | `Exact` | names equal ignoring case, or normalised names equal        | `pattern_confidence`  |
//! | `Stem`  | equal without separators, singular tokens equal, substring  | `pattern_confidence × 0.95` |
//! |         | (≥3 chars), shared token                                    |                       |
//! |         | with the same generic qualifiers (`id`, `date`, `name`, ...)|                       |
//! | none    | anything else                                               | excluded              |
//!
//! Pairs whose types fall in incompatible families are excluded. Output
//! order follows the source then target column order, so a schema pair
//! always yields the same list.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::inflection::{compact, normalise, tokens};
use super::model::{MatchType, ReconciliationRule, RuleOrigin};
use super::{RuleError, RuleResult};
use crate::config::RuleConfig;
use crate::db::TableSchema;

/// Weight applied to stem-tier matches.
const STEM_WEIGHT: f64 = 0.95;

/// Minimum length of a name contained in another to count as a stem match.
const MIN_SUBSTRING_LEN: usize = 3;

/// Tokens too common to signal a match on their own.
static GENERIC_TOKENS: &[&str] = &[
    "id", "key", "code", "no", "num", "number", "nr", "name", "type", "date", "dt", "ts", "time",
    "status", "flag", "value", "val", "amount", "amt", "desc", "description", "is", "at", "on",
    "by", "of", "to", "from", "created", "updated",
];

/// Name-similarity tier. Ordered weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityTier {
    Stem,
    Exact,
}

/// Score two column names.
pub fn name_similarity(a: &str, b: &str) -> Option<SimilarityTier> {
    let (na, nb) = (normalise(a), normalise(b));
    if na.is_empty() || nb.is_empty() {
        return None;
    }
    // Snake-casing splits only at case changes, so `CustomerID` and a
    // folded `customerid` need the plain comparison too.
    if na == nb || a.trim().eq_ignore_ascii_case(b.trim()) {
        return Some(SimilarityTier::Exact);
    }
    if compact(a) == compact(b) {
        return Some(SimilarityTier::Stem);
    }

    let (ta, tb) = (tokens(a), tokens(b));
    if ta == tb {
        return Some(SimilarityTier::Stem);
    }

    let (short, long) = if na.len() <= nb.len() { (&na, &nb) } else { (&nb, &na) };
    if short.len() >= MIN_SUBSTRING_LEN && long.contains(short.as_str()) {
        return Some(SimilarityTier::Stem);
    }

    // A shared distinctive token counts only when the generic qualifiers agree,
    // so invoice_number ~ invoice_date does not match but vendor_ref_name ~ name_vendor does.
    let is_generic = |t: &String| GENERIC_TOKENS.contains(&t.as_str());
    let generic_a: BTreeSet<&String> = ta.iter().filter(|t| is_generic(t)).collect();
    let generic_b: BTreeSet<&String> = tb.iter().filter(|t| is_generic(t)).collect();
    let shared = ta
        .iter()
        .filter(|t| !is_generic(t) && t.len() >= MIN_SUBSTRING_LEN)
        .any(|t| tb.contains(t));
    if shared && generic_a == generic_b {
        return Some(SimilarityTier::Stem);
    }

    None
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Generate pattern candidates for a schema pair.
pub fn generate_candidates(
    source: &TableSchema,
    target: &TableSchema,
    config: &RuleConfig,
) -> Vec<ReconciliationRule> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    let mut rules = Vec::new();

    for src in &source.columns {
        for tgt in &target.columns {
            let Some(tier) = name_similarity(&src.name, &tgt.name) else {
                continue;
            };
            if tier < config.min_similarity {
                continue;
            }
            if !src.column_type().is_compatible_with(&tgt.column_type()) {
                tracing::trace!(
                    source = %src.name,
                    target = %tgt.name,
                    "skipping name match with incompatible types"
                );
                continue;
            }
            if !seen.insert((src.name.clone(), tgt.name.clone())) {
                continue;
            }

            let (confidence, reasoning) = match tier {
                SimilarityTier::Exact => (
                    config.pattern_confidence,
                    format!("column names match ({})", normalise(&src.name)),
                ),
                SimilarityTier::Stem => (
                    round4(config.pattern_confidence * STEM_WEIGHT),
                    format!("column names share a stem ({} ~ {})", src.name, tgt.name),
                ),
            };

            rules.push(
                ReconciliationRule::new(
                    &source.name,
                    vec![src.name.clone()],
                    &target.name,
                    vec![tgt.name.clone()],
                    MatchType::Exact,
                    confidence,
                    RuleOrigin::Pattern,
                )
                .with_reasoning(reasoning),
            );
        }
    }

    tracing::debug!(
        source = %source.name,
        target = %target.name,
        candidates = rules.len(),
        "generated pattern candidates"
    );
    rules
}

/// A caller-declared column correspondence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitPair {
    pub source_columns: Vec<String>,
    pub target_columns: Vec<String>,
    #[serde(default)]
    pub match_type: MatchType,
}

impl ExplicitPair {
    pub fn new(source: &[&str], target: &[&str]) -> Self {
        Self {
            source_columns: source.iter().map(|s| s.to_string()).collect(),
            target_columns: target.iter().map(|s| s.to_string()).collect(),
            match_type: MatchType::Exact,
        }
    }

    /// Parse `src_a+src_b=tgt_a+tgt_b`, optionally suffixed `:fuzzy` or `:semantic`.
    pub fn parse(s: &str) -> RuleResult<Self> {
        let (body, match_type) = match s.rsplit_once(':') {
            Some((body, "exact")) => (body, MatchType::Exact),
            Some((body, "fuzzy")) => (body, MatchType::Fuzzy),
            Some((body, "semantic")) => (body, MatchType::Semantic),
            Some((_, other)) => {
                return Err(RuleError::InvalidRule(format!("unknown match type '{other}'")))
            }
            None => (s, MatchType::Exact),
        };
        let (src, tgt) = body
            .split_once('=')
            .ok_or_else(|| RuleError::InvalidRule(format!("expected SRC=TGT, got '{s}'")))?;
        let split = |side: &str| -> Vec<String> {
            side.split('+')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        };
        Ok(Self {
            source_columns: split(src),
            target_columns: split(tgt),
            match_type,
        })
    }
}

/// Turn explicit pairs into rules (confidence 1.0), checking columns exist.
pub fn explicit_pair_rules(
    source: &TableSchema,
    target: &TableSchema,
    pairs: &[ExplicitPair],
) -> RuleResult<Vec<ReconciliationRule>> {
    pairs
        .iter()
        .map(|pair| {
            source
                .require_columns(&pair.source_columns)
                .and_then(|_| target.require_columns(&pair.target_columns))
                .map_err(|e| RuleError::UnknownColumn(e.to_string()))?;
            let rule = ReconciliationRule::new(
                &source.name,
                pair.source_columns.clone(),
                &target.name,
                pair.target_columns.clone(),
                pair.match_type,
                1.0,
                RuleOrigin::ExplicitPair,
            )
            .with_reasoning("declared by caller");
            rule.validate().map_err(RuleError::InvalidRule)?;
            Ok(rule)
        })
        .collect()
}
