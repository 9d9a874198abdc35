//! Staged runs: slices extracted once, loaded into a landing database and
//! matched there.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

use reconciler::db::{
    BulkLoadStatus, Database, DbError, DbResult, QueryRows, SchemaProvider, SqliteDatabase, TableSchema,
};
use reconciler::engine::{ExecutionMode, ExecutionStatus, MemoryResultSink, RuleOutcome};
use reconciler::rules::{MatchType, ReconciliationRule, RuleOrigin, RuleSet};
use reconciler::sql::Dialect;
use reconciler::staging::{Clock, ManualClock, StagingManager, StagingState};
use reconciler::{ExecutionCoordinator, ModePreference, RunConfig, Warning};

// ============================================================================
// Fixtures
// ============================================================================

fn source_db() -> Arc<SqliteDatabase> {
    let db = SqliteDatabase::open_in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE invoices (invoice_no INTEGER, customer TEXT, total REAL);
         CREATE TABLE credit_notes (note_no INTEGER, customer TEXT);",
    )
    .unwrap();
    let rows: Vec<String> = (1..=40)
        .map(|i| format!("({i}, 'Customer {}', {i}.25)", i % 7))
        .collect();
    db.execute_batch(&format!("INSERT INTO invoices VALUES {};", rows.join(", ")))
        .unwrap();
    db.execute_batch("INSERT INTO credit_notes VALUES (1, 'customer 1'), (2, 'Customer 9');")
        .unwrap();
    Arc::new(db)
}

fn target_db() -> Arc<SqliteDatabase> {
    let db = SqliteDatabase::open_in_memory().unwrap();
    db.execute_batch("CREATE TABLE receipts (invoice_ref INTEGER, payer TEXT, paid REAL);")
        .unwrap();
    let rows: Vec<String> = (25..=60)
        .map(|i| format!("({i}, ' customer {} ', {i}.25)", i % 5))
        .collect();
    db.execute_batch(&format!("INSERT INTO receipts VALUES {};", rows.join(", ")))
        .unwrap();
    Arc::new(db)
}

fn ruleset() -> RuleSet {
    let rules = vec![
        ReconciliationRule::new(
            "invoices",
            vec!["invoice_no".into()],
            "receipts",
            vec!["invoice_ref".into()],
            MatchType::Exact,
            1.0,
            RuleOrigin::ExplicitPair,
        ),
        ReconciliationRule::new(
            "invoices",
            vec!["customer".into()],
            "receipts",
            vec!["payer".into()],
            MatchType::Fuzzy,
            0.75,
            RuleOrigin::Pattern,
        ),
        ReconciliationRule::new(
            "credit_notes",
            vec!["customer".into()],
            "receipts",
            vec!["payer".into()],
            MatchType::Fuzzy,
            0.7,
            RuleOrigin::Llm,
        ),
    ];
    RuleSet::new("billing", "treasury", rules, Vec::new()).unwrap()
}

async fn staging(landing: Arc<dyn Database>) -> (Arc<StagingManager>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        DateTime::from_timestamp(1_767_225_600, 0).unwrap(),
    ));
    let config = RunConfig::default().with_insert_batch_size(7);
    let manager = StagingManager::open(landing, &config, clock.clone()).await.unwrap();
    (Arc::new(manager), clock)
}

fn staged_config() -> RunConfig {
    RunConfig::default().with_mode(ModePreference::Staged)
}

fn counts(outcomes: &[RuleOutcome]) -> Vec<(String, u64, u64, u64, u64, u64)> {
    outcomes
        .iter()
        .map(|o| {
            (
                o.rule_id.clone(),
                o.total_source,
                o.total_target,
                o.matched_count,
                o.unmatched_source_count,
                o.unmatched_target_count,
            )
        })
        .collect()
}

/// Landing database that refuses to build indexes on one column.
#[derive(Debug)]
struct NoIndexOn {
    inner: SqliteDatabase,
    column: &'static str,
}

#[async_trait]
impl SchemaProvider for NoIndexOn {
    async fn table_schema(&self, table: &str) -> DbResult<TableSchema> {
        self.inner.table_schema(table).await
    }
}

#[async_trait]
impl Database for NoIndexOn {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn query(&self, sql: &str) -> DbResult<QueryRows> {
        self.inner.query(sql).await
    }

    async fn execute(&self, sql: &str) -> DbResult<u64> {
        if sql.starts_with("CREATE INDEX") && sql.contains(&format!("(\"{}\")", self.column)) {
            return Err(DbError::Query(format!("cannot index {}", self.column)));
        }
        self.inner.execute(sql).await
    }

    async fn estimate_row_count(&self, table: &str) -> DbResult<u64> {
        self.inner.estimate_row_count(table).await
    }

    async fn bulk_load(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> DbResult<BulkLoadStatus> {
        self.inner.bulk_load(table, columns, rows).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_staged_counts_match_federated() {
    let (source, target) = (source_db(), target_db());
    let rs = ruleset();

    let federated = ExecutionCoordinator::new(
        source.clone(),
        target.clone(),
        Arc::new(MemoryResultSink::new()),
        RunConfig::default().with_mode(ModePreference::Federated),
    )
    .run(&rs)
    .await
    .unwrap();

    let (manager, _) = staging(Arc::new(SqliteDatabase::open_in_memory().unwrap())).await;
    let staged = ExecutionCoordinator::new(source, target, Arc::new(MemoryResultSink::new()), staged_config())
        .with_staging(manager.clone())
        .run(&rs)
        .await
        .unwrap();

    assert_eq!(federated.mode, ExecutionMode::Federated);
    assert_eq!(staged.mode, ExecutionMode::Staged);
    assert_eq!(counts(&staged.rules), counts(&federated.rules));
    assert_eq!(staged.rules[0].matched_count, 16);

    // Two source slices (invoices, credit_notes) and one target slice.
    assert_eq!(staged.staging_tables.len(), 3);
    assert!(staged.warnings.is_empty(), "{:?}", staged.warnings);
    assert_eq!(manager.live_tables(), 0);
}

#[tokio::test]
async fn test_batched_fallback_gives_identical_counts() {
    let (source, target) = (source_db(), target_db());
    let rs = ruleset();

    let (bulk, _) = staging(Arc::new(SqliteDatabase::open_in_memory().unwrap())).await;
    let with_bulk = ExecutionCoordinator::new(
        source.clone(),
        target.clone(),
        Arc::new(MemoryResultSink::new()),
        staged_config(),
    )
    .with_staging(bulk)
    .run(&rs)
    .await
    .unwrap();

    let landing = SqliteDatabase::open_in_memory().unwrap().without_bulk_load();
    let (batched, _) = staging(Arc::new(landing)).await;
    let without_bulk = ExecutionCoordinator::new(source, target, Arc::new(MemoryResultSink::new()), staged_config())
        .with_staging(batched)
        .run(&rs)
        .await
        .unwrap();

    assert_eq!(without_bulk.status, ExecutionStatus::Success);
    assert_eq!(counts(&without_bulk.rules), counts(&with_bulk.rules));
    let fallbacks = without_bulk
        .warnings
        .iter()
        .filter(|w| matches!(w, Warning::BulkLoadUnavailable { .. }))
        .count();
    assert_eq!(fallbacks, 3);
}

#[tokio::test]
async fn test_index_failure_is_a_warning() {
    let landing = Arc::new(NoIndexOn {
        inner: SqliteDatabase::open_in_memory().unwrap(),
        column: "invoice_no",
    });
    let (manager, _) = staging(landing).await;
    let record = ExecutionCoordinator::new(
        source_db(),
        target_db(),
        Arc::new(MemoryResultSink::new()),
        staged_config(),
    )
    .with_staging(manager.clone())
    .run(&ruleset())
    .await
    .unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.rules[0].matched_count, 16);
    assert!(record.warnings.iter().any(|w| matches!(
        w,
        Warning::IndexCreationFailed { column, .. } if column == "invoice_no"
    )));

    let tables = manager
        .catalog()
        .list_for_execution(&record.execution_id)
        .await
        .unwrap();
    let invoices = tables.iter().find(|t| t.origin_table == "invoices").unwrap();
    assert_eq!(invoices.indexes_created, vec!["customer"]);
    let receipts = tables.iter().find(|t| t.origin_table == "receipts").unwrap();
    assert_eq!(receipts.indexes_created, vec!["invoice_ref", "payer"]);
}

#[tokio::test]
async fn test_index_failure_on_text_column_is_a_warning() {
    let landing = Arc::new(NoIndexOn {
        inner: SqliteDatabase::open_in_memory().unwrap(),
        column: "customer",
    });
    let (manager, _) = staging(landing).await;
    let (source, target) = (source_db(), target_db());
    let record = ExecutionCoordinator::new(
        source.clone(),
        target.clone(),
        Arc::new(MemoryResultSink::new()),
        staged_config(),
    )
    .with_staging(manager.clone())
    .run(&ruleset())
    .await
    .unwrap();
    let federated = ExecutionCoordinator::new(
        source,
        target,
        Arc::new(MemoryResultSink::new()),
        RunConfig::default().with_mode(ModePreference::Federated),
    )
    .run(&ruleset())
    .await
    .unwrap();

    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(counts(&record.rules), counts(&federated.rules));
    let failed: Vec<&str> = record
        .warnings
        .iter()
        .filter_map(|w| match w {
            Warning::IndexCreationFailed { column, .. } => Some(column.as_str()),
            _ => None,
        })
        .collect();
    // customer is a TEXT column on both invoices and credit_notes
    assert_eq!(failed, vec!["customer", "customer"]);

    let tables = manager
        .catalog()
        .list_for_execution(&record.execution_id)
        .await
        .unwrap();
    let invoices = tables.iter().find(|t| t.origin_table == "invoices").unwrap();
    assert_eq!(invoices.indexes_created, vec!["invoice_no"]);
    let notes = tables.iter().find(|t| t.origin_table == "credit_notes").unwrap();
    assert!(notes.indexes_created.is_empty());
}

#[tokio::test]
async fn test_tables_end_retained_with_ttl() {
    let landing: Arc<dyn Database> = Arc::new(SqliteDatabase::open_in_memory().unwrap());
    let (manager, clock) = staging(landing.clone()).await;
    let record = ExecutionCoordinator::new(
        source_db(),
        target_db(),
        Arc::new(MemoryResultSink::new()),
        staged_config(),
    )
    .with_staging(manager.clone())
    .run(&ruleset())
    .await
    .unwrap();

    let tables = manager
        .catalog()
        .list_for_execution(&record.execution_id)
        .await
        .unwrap();
    assert_eq!(tables.len(), 3);
    for table in &tables {
        assert_eq!(table.state, StagingState::Retained);
        assert!(table.ttl_expires_at > clock.now());
        assert!(record.staging_tables.contains(&table.name));
        // Still present in the landing database.
        landing.table_schema(&table.name).await.unwrap();
    }
    let invoices = tables.iter().find(|t| t.origin_table == "invoices").unwrap();
    assert_eq!(invoices.row_count, 40);
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_tables() {
    let (manager, _) = staging(Arc::new(SqliteDatabase::open_in_memory().unwrap())).await;
    let coordinator = ExecutionCoordinator::new(
        source_db(),
        target_db(),
        Arc::new(MemoryResultSink::new()),
        staged_config(),
    )
    .with_staging(manager.clone());
    let rs = ruleset();

    let (a, b) = tokio::join!(coordinator.run(&rs), coordinator.run(&rs));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.execution_id, b.execution_id);
    assert!(a.staging_tables.iter().all(|t| !b.staging_tables.contains(t)));
    assert_eq!(counts(&a.rules), counts(&b.rules));

    let owned = manager
        .catalog()
        .list_for_execution(&a.execution_id)
        .await
        .unwrap();
    assert!(owned.iter().all(|t| t.execution_id == a.execution_id));
}

#[tokio::test]
async fn test_auto_mode_stages_above_threshold() {
    let (manager, _) = staging(Arc::new(SqliteDatabase::open_in_memory().unwrap())).await;
    let config = RunConfig::default().with_staging_threshold(30);
    let coordinator = ExecutionCoordinator::new(source_db(), target_db(), Arc::new(MemoryResultSink::new()), config)
        .with_staging(manager);

    let record = coordinator.run(&ruleset()).await.unwrap();
    assert_eq!(record.mode, ExecutionMode::Staged);
}

#[tokio::test]
async fn test_staged_request_without_landing_falls_back() {
    let record = ExecutionCoordinator::new(
        source_db(),
        target_db(),
        Arc::new(MemoryResultSink::new()),
        staged_config(),
    )
    .run(&ruleset())
    .await
    .unwrap();

    assert_eq!(record.mode, ExecutionMode::Federated);
    assert!(matches!(record.warnings.as_slice(), [Warning::ModeFallback { .. }]));
}
