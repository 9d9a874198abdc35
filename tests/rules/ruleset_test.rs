//! Ruleset generation: determinism, filter guarantees and the enhancer seam.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use reconciler::config::RuleConfig;
use reconciler::db::TableSchema;
use reconciler::rules::{
    build_ruleset, filter_rules, ExplicitPair, MatchType, NoEnhancer, ReconciliationRule,
    RuleOrigin, StaticRuleEnhancer,
};
use reconciler::Warning;

fn orders() -> TableSchema {
    TableSchema::new("erp_orders")
        .column("OrderId", "bigint")
        .column("CustomerId", "bigint")
        .column("order_date", "date")
        .column("total_amount", "decimal(18,2)")
        .column("status", "varchar(20)")
        .column("notes", "text")
}

fn invoices() -> TableSchema {
    TableSchema::new("billing_invoices")
        .column("order_id", "bigint")
        .column("customer_id", "bigint")
        .column("invoice_date", "date")
        .column("amount", "numeric(18,2)")
        .column("status", "varchar(32)")
        .column("note", "text")
}

fn candidate(source: &[&str], target: &[&str], match_type: MatchType, confidence: f64) -> serde_json::Value {
    json!({
        "source_table": "erp_orders",
        "source_columns": source,
        "target_table": "billing_invoices",
        "target_columns": target,
        "match_type": match_type,
        "confidence_score": confidence,
        "reasoning": "proposed"
    })
}

fn enhancer_file(candidates: serde_json::Value) -> (tempfile::TempDir, StaticRuleEnhancer) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("candidates.json");
    std::fs::write(&path, serde_json::to_string(&candidates).unwrap()).unwrap();
    (dir, StaticRuleEnhancer::new(path))
}

// ============================================================================
// Determinism and filter guarantees
// ============================================================================

#[tokio::test]
async fn test_generation_is_deterministic() {
    let config = RuleConfig::default();
    let a = build_ruleset(&orders(), &invoices(), &[], &NoEnhancer, vec![], &config)
        .await
        .unwrap();
    let b = build_ruleset(&orders(), &invoices(), &[], &NoEnhancer, vec![], &config)
        .await
        .unwrap();

    assert_ne!(a.ruleset_id, b.ruleset_id);
    assert_eq!(a.fingerprint, b.fingerprint);
    assert_eq!(
        serde_json::to_string(&a.rules).unwrap(),
        serde_json::to_string(&b.rules).unwrap()
    );
}

#[tokio::test]
async fn test_filter_guarantees_hold() {
    let config = RuleConfig::default().with_per_pair_cap(2).with_min_confidence(0.7);
    let pairs = [ExplicitPair::new(&["OrderId"], &["order_id"])];
    let rs = build_ruleset(&orders(), &invoices(), &pairs, &NoEnhancer, vec![], &config)
        .await
        .unwrap();

    assert!(!rs.is_empty());

    let signatures: BTreeSet<_> = rs.rules.iter().map(|r| r.signature()).collect();
    assert_eq!(signatures.len(), rs.len(), "duplicate signature in {:#?}", rs.rules);

    assert!(rs.rules.iter().all(|r| r.confidence_score >= 0.7));

    let mut per_pair: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for r in &rs.rules {
        *per_pair
            .entry((r.source_table.as_str(), r.target_table.as_str()))
            .or_default() += 1;
    }
    assert!(per_pair.values().all(|&n| n <= 2));

    // The explicit pair carries confidence 1.0 and leads.
    assert_eq!(rs.rules[0].origin, RuleOrigin::ExplicitPair);
    assert_eq!(rs.rules[0].source_columns, vec!["OrderId"]);
}

#[test]
fn test_identical_confidence_prefers_exact() {
    let semantic = ReconciliationRule::new(
        "a",
        vec!["x".into()],
        "b",
        vec!["x".into()],
        MatchType::Semantic,
        0.8,
        RuleOrigin::Llm,
    );
    let exact = ReconciliationRule::new(
        "a",
        vec!["x".into()],
        "b",
        vec!["x".into()],
        MatchType::Exact,
        0.8,
        RuleOrigin::Pattern,
    );
    let config = RuleConfig::default().with_per_pair_cap(1);

    let forward = filter_rules(vec![semantic.clone(), exact.clone()], &config);
    let backward = filter_rules(vec![exact, semantic], &config);
    assert_eq!(forward, backward);
    assert_eq!(forward[0].match_type, MatchType::Exact);
}

#[test]
fn test_low_confidence_rules_are_excluded() {
    let weak = ReconciliationRule::new(
        "a",
        vec!["x".into()],
        "b",
        vec!["y".into()],
        MatchType::Fuzzy,
        0.69,
        RuleOrigin::Llm,
    );
    assert!(filter_rules(vec![weak], &RuleConfig::default()).is_empty());
}

// ============================================================================
// Enhancer
// ============================================================================

#[tokio::test]
async fn test_enhancer_candidates_are_vetted() {
    let (_dir, enhancer) = enhancer_file(json!([
        candidate(&["notes"], &["note"], MatchType::Semantic, 0.92),
        candidate(&["OrderId", "status"], &["order_id"], MatchType::Exact, 0.99),
        candidate(&["missing"], &["note"], MatchType::Fuzzy, 0.9),
    ]));
    let config = RuleConfig::default().with_per_pair_cap(10);

    let rs = build_ruleset(&orders(), &invoices(), &[], &enhancer, vec![], &config)
        .await
        .unwrap();

    let llm: Vec<_> = rs.rules.iter().filter(|r| r.origin == RuleOrigin::Llm).collect();
    assert_eq!(llm.len(), 1);
    assert_eq!(llm[0].source_columns, vec!["notes"]);
    assert!(llm[0].rule_id.starts_with("rule_"));

    let rejected = rs
        .warnings
        .iter()
        .filter(|w| matches!(w, Warning::EnhancerCandidateRejected { .. }))
        .count();
    assert_eq!(rejected, 2);
}

#[tokio::test]
async fn test_enhancer_cap() {
    let (_dir, enhancer) = enhancer_file(json!([
        candidate(&["notes"], &["note"], MatchType::Semantic, 0.80),
        candidate(&["status"], &["note"], MatchType::Semantic, 0.95),
        candidate(&["order_date"], &["invoice_date"], MatchType::Semantic, 0.90),
    ]));
    let config = RuleConfig::default()
        .with_per_pair_cap(10)
        .with_enhancer_cap(2);

    let rs = build_ruleset(&orders(), &invoices(), &[], &enhancer, vec![], &config)
        .await
        .unwrap();

    let llm: Vec<_> = rs
        .rules
        .iter()
        .filter(|r| r.origin == RuleOrigin::Llm)
        .map(|r| r.confidence_score)
        .collect();
    assert_eq!(llm, vec![0.95, 0.90]);
}

#[tokio::test]
async fn test_unavailable_enhancer_degrades_to_patterns() {
    let enhancer = StaticRuleEnhancer::new("/nonexistent/candidates.json");
    let config = RuleConfig::default();

    let with_failure = build_ruleset(&orders(), &invoices(), &[], &enhancer, vec![], &config)
        .await
        .unwrap();
    let pattern_only = build_ruleset(&orders(), &invoices(), &[], &NoEnhancer, vec![], &config)
        .await
        .unwrap();

    assert_eq!(with_failure.fingerprint, pattern_only.fingerprint);
    assert!(matches!(
        with_failure.warnings.as_slice(),
        [Warning::EnhancerUnavailable { .. }]
    ));
}
