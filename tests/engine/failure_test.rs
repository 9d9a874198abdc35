//! Runs that stop early: schema errors, database faults, cancellation and
//! sink failures. Every one of them leaves a persisted record behind.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

use reconciler::db::{
    BulkLoadStatus, Database, DbError, DbResult, QueryRows, SchemaProvider, SqliteDatabase, TableSchema,
};
use reconciler::engine::{
    CancelHandle, ExecutionRecord, ExecutionStatus, FailureCause, MemoryResultSink, PipelineStep, ResultSink,
    SinkError, SinkResult,
};
use reconciler::rules::{MatchType, ReconciliationRule, RuleOrigin, RuleSet};
use reconciler::sql::Dialect;
use reconciler::staging::{ManualClock, StagingManager, StagingState};
use reconciler::{ExecutionCoordinator, ModePreference, RunConfig};

// ============================================================================
// Fixtures
// ============================================================================

fn orders() -> SqliteDatabase {
    let db = SqliteDatabase::open_in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE orders (order_id INTEGER, sku TEXT);
         INSERT INTO orders VALUES (1, 'A-1'), (2, 'B-2'), (3, 'C-3'), (4, 'D-4');",
    )
    .unwrap();
    db
}

fn shipments() -> SqliteDatabase {
    let db = SqliteDatabase::open_in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE shipments (order_ref INTEGER, sku TEXT);
         INSERT INTO shipments VALUES (2, 'b-2'), (3, 'C-3'), (9, 'Z-9');",
    )
    .unwrap();
    db
}

fn rule(source_column: &str, target_column: &str, match_type: MatchType) -> ReconciliationRule {
    ReconciliationRule::new(
        "orders",
        vec![source_column.into()],
        "shipments",
        vec![target_column.into()],
        match_type,
        0.9,
        RuleOrigin::Pattern,
    )
}

fn ruleset(rules: Vec<ReconciliationRule>) -> RuleSet {
    RuleSet::new("sales", "logistics", rules, Vec::new()).unwrap()
}

fn two_rules() -> RuleSet {
    ruleset(vec![
        rule("order_id", "order_ref", MatchType::Exact),
        rule("sku", "sku", MatchType::Fuzzy),
    ])
}

fn federated() -> RunConfig {
    RunConfig::default().with_mode(ModePreference::Federated)
}

/// What a [`Faulty`] database does to matching queries.
#[derive(Debug)]
enum Fault {
    Reject,
    Disconnect,
    Stall(Duration),
    Cancel(CancelHandle),
}

/// SQLite database that misbehaves on queries containing `needle`.
#[derive(Debug)]
struct Faulty {
    inner: SqliteDatabase,
    needle: &'static str,
    fault: Fault,
    hits: AtomicUsize,
}

impl Faulty {
    fn new(inner: SqliteDatabase, needle: &'static str, fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            inner,
            needle,
            fault,
            hits: AtomicUsize::new(0),
        })
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaProvider for Faulty {
    async fn table_schema(&self, table: &str) -> DbResult<TableSchema> {
        self.inner.table_schema(table).await
    }
}

#[async_trait]
impl Database for Faulty {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn query(&self, sql: &str) -> DbResult<QueryRows> {
        if sql.contains(self.needle) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            match &self.fault {
                Fault::Reject => return Err(DbError::Query("syntax error near SELECT".into())),
                Fault::Disconnect => return Err(DbError::Connection("connection reset by peer".into())),
                Fault::Stall(d) => tokio::time::sleep(*d).await,
                Fault::Cancel(handle) => handle.cancel(),
            }
        }
        self.inner.query(sql).await
    }

    async fn execute(&self, sql: &str) -> DbResult<u64> {
        self.inner.execute(sql).await
    }

    async fn estimate_row_count(&self, table: &str) -> DbResult<u64> {
        self.inner.estimate_row_count(table).await
    }

    async fn bulk_load(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> DbResult<BulkLoadStatus> {
        self.inner.bulk_load(table, columns, rows).await
    }
}

#[derive(Debug)]
struct BrokenSink;

#[async_trait]
impl ResultSink for BrokenSink {
    async fn persist(&self, _record: &ExecutionRecord) -> SinkResult<String> {
        Err(SinkError::Unavailable("results volume is read-only".into()))
    }
}

fn assert_failed_record(record: &ExecutionRecord, step: PipelineStep) {
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.step, PipelineStep::Failed);
    assert!(record.kpi_snapshot.is_none());
    assert!(record.is_finished());
    assert_eq!(record.failure.as_ref().map(|f| f.step), Some(step));
}

// ============================================================================
// Schema and configuration
// ============================================================================

#[tokio::test]
async fn test_missing_column_fails_at_init() {
    let sink = Arc::new(MemoryResultSink::new());
    let rs = ruleset(vec![
        rule("order_id", "order_ref", MatchType::Exact),
        rule("customer_email", "sku", MatchType::Fuzzy),
    ]);
    let broken_id = rs
        .rules
        .iter()
        .find(|r| r.source_columns == ["customer_email"])
        .map(|r| r.rule_id.clone());

    let coordinator = ExecutionCoordinator::new(
        Arc::new(orders()),
        Arc::new(shipments()),
        sink.clone(),
        federated(),
    );
    let failure = coordinator.run(&rs).await.unwrap_err();

    assert_eq!(failure.step, PipelineStep::Init);
    assert!(matches!(failure.cause, FailureCause::SchemaNotFound(ref m) if m.contains("customer_email")));
    assert_eq!(failure.rule_id, broken_id);
    assert!(failure.record.rules.is_empty());
    assert_failed_record(&failure.record, PipelineStep::Init);
    assert_eq!(sink.records(), vec![*failure.record]);
}

#[tokio::test]
async fn test_missing_table_fails_at_init() {
    let sink = Arc::new(MemoryResultSink::new());
    let mut ghost = rule("order_id", "order_ref", MatchType::Exact);
    ghost.target_table = "returns".into();

    let failure = ExecutionCoordinator::new(Arc::new(orders()), Arc::new(shipments()), sink.clone(), federated())
        .run(&ruleset(vec![ghost]))
        .await
        .unwrap_err();

    assert!(matches!(failure.cause, FailureCause::SchemaNotFound(_)));
    assert!(failure.rule_id.is_some());
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn test_invalid_config_fails_before_any_query() {
    let source = Faulty::new(orders(), "", Fault::Reject);
    let sink = Arc::new(MemoryResultSink::new());

    let failure = ExecutionCoordinator::new(
        source.clone(),
        Arc::new(shipments()),
        sink.clone(),
        federated().with_insert_batch_size(0),
    )
    .run(&two_rules())
    .await
    .unwrap_err();

    assert!(matches!(failure.cause, FailureCause::InvalidConfig(_)));
    assert_eq!(failure.step, PipelineStep::Init);
    assert_eq!(source.hits(), 0);
    assert_eq!(sink.records().len(), 1);
}

// ============================================================================
// Database faults
// ============================================================================

#[tokio::test]
async fn test_rejected_query_is_not_retried() {
    let source = Faulty::new(orders(), "GROUP BY", Fault::Reject);
    let sink = Arc::new(MemoryResultSink::new());
    let rs = two_rules();

    let failure = ExecutionCoordinator::new(source.clone(), Arc::new(shipments()), sink, federated())
        .run(&rs)
        .await
        .unwrap_err();

    assert_eq!(failure.step, PipelineStep::Match);
    assert_eq!(failure.rule_id.as_deref(), Some(rs.rules[0].rule_id.as_str()));
    assert!(matches!(failure.cause, FailureCause::Query(_)));
    assert_eq!(source.hits(), 1);
    assert_failed_record(&failure.record, PipelineStep::Match);
}

#[tokio::test]
async fn test_connection_errors_are_retried_then_reported() {
    let source = Faulty::new(orders(), "GROUP BY", Fault::Disconnect);
    let config = federated().with_retries(2, Duration::from_millis(1));

    let failure = ExecutionCoordinator::new(
        source.clone(),
        Arc::new(shipments()),
        Arc::new(MemoryResultSink::new()),
        config,
    )
    .run(&two_rules())
    .await
    .unwrap_err();

    assert!(matches!(failure.cause, FailureCause::Connection(_)));
    assert_eq!(source.hits(), 3);
}

#[tokio::test]
async fn test_slow_query_times_out() {
    let target = Faulty::new(shipments(), "GROUP BY", Fault::Stall(Duration::from_millis(500)));
    let config = federated()
        .with_retries(0, Duration::from_millis(1))
        .with_query_timeout(Duration::from_millis(20));

    let failure = ExecutionCoordinator::new(Arc::new(orders()), target, Arc::new(MemoryResultSink::new()), config)
        .run(&two_rules())
        .await
        .unwrap_err();

    assert_eq!(failure.cause, FailureCause::Timeout(20));
    assert_eq!(failure.step, PipelineStep::Match);
}

#[tokio::test]
async fn test_staged_failure_keeps_staging_tables() {
    let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(1_767_225_600, 0).unwrap()));
    let landing = Faulty::new(SqliteDatabase::open_in_memory().unwrap(), "total_source", Fault::Reject);
    let manager = Arc::new(
        StagingManager::open(landing.clone(), &RunConfig::default(), clock)
            .await
            .unwrap(),
    );
    let sink = Arc::new(MemoryResultSink::new());
    let rs = two_rules();

    let failure = ExecutionCoordinator::new(
        Arc::new(orders()),
        Arc::new(shipments()),
        sink.clone(),
        RunConfig::default().with_mode(ModePreference::Staged),
    )
    .with_staging(manager.clone())
    .run(&rs)
    .await
    .unwrap_err();

    assert_eq!(failure.step, PipelineStep::Match);
    assert_eq!(failure.rule_id.as_deref(), Some(rs.rules[0].rule_id.as_str()));
    assert_failed_record(&failure.record, PipelineStep::Match);
    assert_eq!(failure.record.staging_tables.len(), 2);

    let tables = manager
        .catalog()
        .list_for_execution(&failure.record.execution_id)
        .await
        .unwrap();
    assert_eq!(tables.len(), 2);
    for table in &tables {
        assert_eq!(table.state, StagingState::Retained);
        landing.table_schema(&table.name).await.unwrap();
    }
    assert_eq!(manager.live_tables(), 0);
    assert_eq!(sink.records().len(), 1);
}

// ============================================================================
// Cancellation and persistence
// ============================================================================

#[tokio::test]
async fn test_cancel_between_rules_records_partial_run() {
    let cancel = CancelHandle::new();
    let source = Faulty::new(orders(), "GROUP BY", Fault::Cancel(cancel.clone()));
    let sink = Arc::new(MemoryResultSink::new());

    let failure = ExecutionCoordinator::new(source, Arc::new(shipments()), sink.clone(), federated())
        .run_with_cancel(&two_rules(), &cancel)
        .await
        .unwrap_err();

    assert_eq!(failure.cause, FailureCause::Cancelled);
    assert_eq!(failure.step, PipelineStep::Match);
    let record = &failure.record;
    assert_eq!(record.status, ExecutionStatus::Partial);
    assert_eq!(record.step, PipelineStep::Match);
    assert_eq!(record.rules.len(), 1);
    assert_eq!(record.rules[0].matched_count, 2);
    assert!(record.kpi_snapshot.is_none());
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn test_sink_failure_fails_the_run() {
    let failure = ExecutionCoordinator::new(
        Arc::new(orders()),
        Arc::new(shipments()),
        Arc::new(BrokenSink),
        federated(),
    )
    .run(&two_rules())
    .await
    .unwrap_err();

    assert_eq!(failure.step, PipelineStep::Persist);
    assert!(matches!(failure.cause, FailureCause::Sink(ref m) if m.contains("read-only")));
    assert_eq!(failure.record.status, ExecutionStatus::Failed);
    // Matching itself completed.
    assert_eq!(failure.record.rules.len(), 2);
    assert!(failure.to_string().starts_with("execution failed at PERSIST"));
}
