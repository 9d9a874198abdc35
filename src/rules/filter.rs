//! Merge, threshold, deduplicate and cap rule candidates.

use std::collections::{BTreeMap, HashSet};

use super::model::{rule_order, ReconciliationRule};
use crate::config::RuleConfig;

/// Produce the final ordered rule list.
///
/// 1. Sort by [`rule_order`] (confidence desc with a total tie-break).
/// 2. Drop rules below `min_confidence`.
/// 3. Drop repeated signatures; the first occurrence wins.
/// 4. Keep at most `per_pair_cap` rules per (source_table, target_table).
///
/// Pure: the output depends only on the candidate multiset and `config`.
pub fn filter_rules(candidates: Vec<ReconciliationRule>, config: &RuleConfig) -> Vec<ReconciliationRule> {
    let mut candidates = candidates;
    candidates.sort_by(rule_order);

    let total = candidates.len();
    let mut seen = HashSet::new();
    let mut per_pair: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut kept = Vec::new();
    let (mut low, mut dup, mut capped) = (0usize, 0usize, 0usize);

    for rule in candidates {
        if rule.confidence_score < config.min_confidence {
            low += 1;
            continue;
        }
        if !seen.insert(rule.signature()) {
            dup += 1;
            continue;
        }
        let count = per_pair
            .entry((rule.source_table.clone(), rule.target_table.clone()))
            .or_default();
        if *count >= config.per_pair_cap {
            capped += 1;
            continue;
        }
        *count += 1;
        kept.push(rule);
    }

    tracing::debug!(
        candidates = total,
        kept = kept.len(),
        below_threshold = low,
        duplicates = dup,
        over_cap = capped,
        "filtered rule candidates"
    );
    kept
}
