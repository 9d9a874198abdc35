//! Expiry sweep: only tables past their TTL are dropped, and a second pass
//! has nothing left to do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use reconciler::db::{
    BulkLoadStatus, ColumnSchema, Database, DbError, DbResult, QueryRows, RetryPolicy, SchemaProvider,
    SqliteDatabase, TableSchema,
};
use reconciler::sql::Dialect;
use reconciler::staging::{
    sweep_expired, ManualClock, StagingCatalog, StagingManager, StagingRole, StagingState, StagingTable,
};
use reconciler::RunConfig;

fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).unwrap()
}

async fn manager(landing: Arc<dyn Database>) -> (StagingManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let manager = StagingManager::open(landing, &RunConfig::default(), clock.clone())
        .await
        .unwrap();
    (manager, clock)
}

async fn retained_table(manager: &StagingManager, origin: &str) -> StagingTable {
    let columns = [ColumnSchema::new("id", "bigint")];
    let mut table = manager
        .create(Uuid::new_v4(), StagingRole::Source, 0, origin, &columns)
        .await
        .unwrap();
    manager
        .load(&mut table, vec![vec![json!(1)], vec![json!(2)]])
        .await
        .unwrap();
    manager.transition(&mut table, StagingState::Retained).await.unwrap();
    table
}

#[tokio::test]
async fn test_unexpired_tables_are_never_dropped() {
    let landing: Arc<dyn Database> = Arc::new(SqliteDatabase::open_in_memory().unwrap());
    let (manager, clock) = manager(landing.clone()).await;
    let table = retained_table(&manager, "ledger").await;

    clock.advance(ChronoDuration::hours(23));
    let report = sweep_expired(manager.catalog(), clock.as_ref()).await.unwrap();

    assert_eq!(report.examined, 0);
    assert!(report.dropped.is_empty());
    assert_eq!(landing.estimate_row_count(&table.name).await.unwrap(), 2);
    assert_eq!(
        manager.catalog().get(&table.name).await.unwrap().unwrap().state,
        StagingState::Retained
    );
}

#[tokio::test]
async fn test_expired_tables_are_dropped_once() {
    let landing: Arc<dyn Database> = Arc::new(SqliteDatabase::open_in_memory().unwrap());
    let (manager, clock) = manager(landing.clone()).await;
    let old = retained_table(&manager, "ledger").await;
    clock.advance(ChronoDuration::hours(12));
    let young = retained_table(&manager, "bank").await;

    clock.advance(ChronoDuration::hours(13));
    let report = sweep_expired(manager.catalog(), clock.as_ref()).await.unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.dropped, vec![old.name.clone()]);
    assert!(report.failed.is_empty());
    assert!(matches!(
        landing.table_schema(&old.name).await,
        Err(DbError::TableNotFound(_))
    ));
    let row = manager.catalog().get(&old.name).await.unwrap().unwrap();
    assert_eq!(row.state, StagingState::Expired);
    landing.table_schema(&young.name).await.unwrap();

    let again = sweep_expired(manager.catalog(), clock.as_ref()).await.unwrap();
    assert_eq!(again.examined, 0);
    assert!(again.dropped.is_empty());
}

#[tokio::test]
async fn test_sweep_runs_from_an_independent_catalog() {
    let landing: Arc<dyn Database> = Arc::new(SqliteDatabase::open_in_memory().unwrap());
    let (manager, _) = manager(landing.clone()).await;
    let table = retained_table(&manager, "ledger").await;

    let config = RunConfig::default();
    let catalog = StagingCatalog::new(landing, &config.catalog_table, RetryPolicy::from_run_config(&config));
    let later = ManualClock::new(epoch() + ChronoDuration::days(2));

    let report = sweep_expired(&catalog, &later).await.unwrap();
    assert_eq!(report.dropped, vec![table.name]);
}

/// Landing database whose DROP statements fail until `allow_drop` is set.
#[derive(Debug)]
struct StubbornLanding {
    inner: SqliteDatabase,
    allow_drop: AtomicBool,
}

#[async_trait]
impl SchemaProvider for StubbornLanding {
    async fn table_schema(&self, table: &str) -> DbResult<TableSchema> {
        self.inner.table_schema(table).await
    }
}

#[async_trait]
impl Database for StubbornLanding {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn query(&self, sql: &str) -> DbResult<QueryRows> {
        self.inner.query(sql).await
    }

    async fn execute(&self, sql: &str) -> DbResult<u64> {
        if sql.starts_with("DROP TABLE") && !self.allow_drop.load(Ordering::SeqCst) {
            return Err(DbError::Query("table is locked".into()));
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

#[tokio::test]
async fn test_failed_drop_is_retried_next_sweep() {
    let landing = Arc::new(StubbornLanding {
        inner: SqliteDatabase::open_in_memory().unwrap(),
        allow_drop: AtomicBool::new(false),
    });
    let (manager, clock) = manager(landing.clone()).await;
    let table = retained_table(&manager, "ledger").await;
    clock.advance(ChronoDuration::days(2));

    let first = sweep_expired(manager.catalog(), clock.as_ref()).await.unwrap();
    assert_eq!(first.examined, 1);
    assert_eq!(first.failed.len(), 1);
    assert_eq!(first.failed[0].table, table.name);
    assert_eq!(
        manager.catalog().get(&table.name).await.unwrap().unwrap().state,
        StagingState::Retained
    );

    landing.allow_drop.store(true, Ordering::SeqCst);
    let second = sweep_expired(manager.catalog(), clock.as_ref()).await.unwrap();
    assert_eq!(second.dropped, vec![table.name]);
}
