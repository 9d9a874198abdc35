//! Federated runs: source and target in separate databases, keys compared
//! in the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use reconciler::db::SqliteDatabase;
use reconciler::engine::{
    ExecutionMode, ExecutionStatus, JsonlResultSink, MemoryResultSink, PipelineStep,
};
use reconciler::kpi::KpiStatus;
use reconciler::rules::{FilterConditions, MatchType, Predicate, ReconciliationRule, RuleOrigin, RuleSet};
use reconciler::{ExecutionCoordinator, ModePreference, RunConfig};

fn database(ddl: &str, ids: impl IntoIterator<Item = u32>, table: &str) -> Arc<SqliteDatabase> {
    let db = SqliteDatabase::open_in_memory().unwrap();
    db.execute_batch(ddl).unwrap();
    let values: Vec<String> = ids
        .into_iter()
        .map(|id| format!("({id}, 'ref-{id}', {}.5)", id * 10))
        .collect();
    if !values.is_empty() {
        db.execute_batch(&format!("INSERT INTO {table} VALUES {};", values.join(", ")))
            .unwrap();
    }
    Arc::new(db)
}

fn payments(ids: impl IntoIterator<Item = u32>) -> Arc<SqliteDatabase> {
    database(
        "CREATE TABLE payments (payment_id INTEGER, reference TEXT, amount REAL);",
        ids,
        "payments",
    )
}

fn settlements(ids: impl IntoIterator<Item = u32>) -> Arc<SqliteDatabase> {
    database(
        "CREATE TABLE settlements (payment_ref INTEGER, reference TEXT, amount REAL);",
        ids,
        "settlements",
    )
}

fn id_rule(confidence: f64) -> ReconciliationRule {
    ReconciliationRule::new(
        "payments",
        vec!["payment_id".into()],
        "settlements",
        vec!["payment_ref".into()],
        MatchType::Exact,
        confidence,
        RuleOrigin::ExplicitPair,
    )
}

fn reference_rule() -> ReconciliationRule {
    ReconciliationRule::new(
        "payments",
        vec!["reference".into()],
        "settlements",
        vec!["reference".into()],
        MatchType::Fuzzy,
        0.8,
        RuleOrigin::Pattern,
    )
}

fn ruleset(rules: Vec<ReconciliationRule>) -> RuleSet {
    RuleSet::new("payments", "settlements", rules, Vec::new()).unwrap()
}

fn coordinator(
    source: Arc<SqliteDatabase>,
    target: Arc<SqliteDatabase>,
    sink: Arc<MemoryResultSink>,
) -> ExecutionCoordinator {
    let config = RunConfig::default().with_mode(ModePreference::Federated);
    ExecutionCoordinator::new(source, target, sink, config)
}

#[tokio::test]
async fn test_disjoint_tables_report_zero_coverage() {
    let sink = Arc::new(MemoryResultSink::new());
    let coordinator = coordinator(payments(1..=100), settlements(101..=200), sink.clone());

    let record = coordinator.run(&ruleset(vec![id_rule(0.9)])).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.mode, ExecutionMode::Federated);
    assert!(record.staging_tables.is_empty());

    let outcome = &record.rules[0];
    assert_eq!(outcome.total_source, 100);
    assert_eq!(outcome.total_target, 100);
    assert_eq!(outcome.matched_count, 0);
    assert_eq!(outcome.unmatched_source_count, 100);
    assert_eq!(outcome.unmatched_target_count, 100);

    let kpi = record.kpi_snapshot.unwrap();
    assert_eq!(kpi.rcr.value, 0.0);
    assert_eq!(kpi.rcr.status, KpiStatus::Critical);
    assert!(!kpi.dqcs.value.is_nan());
    assert!((kpi.dqcs.value - 0.9).abs() < 1e-9);
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn test_counts_are_consistent_per_rule() {
    let sink = Arc::new(MemoryResultSink::new());
    let coordinator = coordinator(payments(1..=10), settlements(6..=13), sink);

    let record = coordinator
        .run(&ruleset(vec![id_rule(1.0), reference_rule()]))
        .await
        .unwrap();

    assert_eq!(record.rules.len(), 2);
    for outcome in &record.rules {
        assert_eq!(outcome.matched_count, 5, "{}", outcome.rule_id);
        assert_eq!(
            outcome.matched_count + outcome.unmatched_source_count,
            outcome.total_source
        );
        assert_eq!(outcome.unmatched_target_count, 3);
    }

    // 10 of 20 source-side rows matched across both rules.
    let kpi = record.kpi_snapshot.unwrap();
    assert!((kpi.rcr.value - 50.0).abs() < 1e-9);
    assert!((kpi.dqcs.value - 0.9).abs() < 1e-9);
    assert_eq!(record.total_matched(), 10);
}

#[tokio::test]
async fn test_fuzzy_rule_ignores_case_and_padding() {
    let source = payments(1..=3);
    source
        .execute_batch("UPDATE payments SET reference = upper(reference) || '  ' WHERE payment_id = 2;")
        .unwrap();
    let target = settlements(1..=3);
    let sink = Arc::new(MemoryResultSink::new());

    let record = coordinator(source, target, sink)
        .run(&ruleset(vec![reference_rule()]))
        .await
        .unwrap();

    assert_eq!(record.rules[0].matched_count, 3);
}

#[tokio::test]
async fn test_filters_restrict_both_sides() {
    let source = payments(1..=6);
    let target = settlements(1..=6);
    let filters = FilterConditions {
        source: BTreeMap::from([("amount".to_string(), Predicate::Gt(json!(30)))]),
        target: BTreeMap::from([(
            "payment_ref".to_string(),
            Predicate::In(vec![json!(1), json!(4), json!(5)]),
        )]),
    };
    let rule = id_rule(0.95).with_filters(filters);
    let sink = Arc::new(MemoryResultSink::new());

    let record = coordinator(source, target, sink)
        .run(&ruleset(vec![rule]))
        .await
        .unwrap();

    // Source keeps ids 3..=6 (amounts 30.5 and up); target keeps 1, 4, 5.
    let outcome = &record.rules[0];
    assert_eq!(outcome.total_source, 4);
    assert_eq!(outcome.total_target, 3);
    assert_eq!(outcome.matched_count, 2);
    assert_eq!(outcome.unmatched_source_count, 2);
    assert_eq!(outcome.unmatched_target_count, 1);
}

#[tokio::test]
async fn test_empty_source_reports_not_applicable() {
    let sink = Arc::new(MemoryResultSink::new());
    let coordinator = coordinator(payments(Vec::new()), settlements(1..=4), sink);

    let record = coordinator.run(&ruleset(vec![id_rule(0.9)])).await.unwrap();

    let kpi = record.kpi_snapshot.unwrap();
    assert_eq!(kpi.rcr.status, KpiStatus::NotApplicable);
    assert_eq!(kpi.rcr.value, 0.0);
    assert_eq!(kpi.rei.status, KpiStatus::NotApplicable);
    assert_eq!(record.rules[0].unmatched_target_count, 4);
}

#[tokio::test]
async fn test_records_append_to_jsonl_sink() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonlResultSink::new(dir.path().join("runs").join("executions.jsonl")));
    let config = RunConfig::default().with_mode(ModePreference::Federated);
    let coordinator = ExecutionCoordinator::new(payments(1..=5), settlements(3..=7), sink.clone(), config);
    let rs = ruleset(vec![id_rule(1.0)]);

    let first = coordinator.run(&rs).await.unwrap();
    let second = coordinator.run(&rs).await.unwrap();

    let stored = sink.read_all().await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].execution_id, first.execution_id);
    assert_eq!(stored[1].execution_id, second.execution_id);
    assert_ne!(first.execution_id, second.execution_id);
    assert!(stored.iter().all(|r| r.step == PipelineStep::Done));
    assert_eq!(stored[0].rules[0].matched_count, 3);
}
