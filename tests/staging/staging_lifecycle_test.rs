//! Staging table lifecycle as seen through the catalog.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use reconciler::db::{
    BulkLoadStatus, ColumnSchema, Database, DbError, DbResult, QueryRows, SchemaProvider, SqliteDatabase,
    TableSchema,
};
use reconciler::sql::Dialect;
use reconciler::staging::{
    Clock, IndexStatus, ManualClock, StagingError, StagingManager, StagingRole, StagingState,
    StagingTable,
};
use reconciler::{RunConfig, Warning};

fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).unwrap()
}

fn columns() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::new("account_no", "varchar(20)"),
        ColumnSchema::new("balance", "decimal(18,2)"),
    ]
}

async fn open(landing: Arc<dyn Database>, retention: Duration) -> (StagingManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let mut config = RunConfig::default();
    config.retention = retention;
    let manager = StagingManager::open(landing, &config, clock.clone()).await.unwrap();
    (manager, clock)
}

async fn stored(manager: &StagingManager, table: &StagingTable) -> StagingTable {
    manager.catalog().get(&table.name).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_full_lifecycle_refreshes_ttl() {
    let (manager, clock) = open(Arc::new(SqliteDatabase::open_in_memory().unwrap()), Duration::from_secs(3600)).await;
    let exec = Uuid::new_v4();

    let mut table = manager
        .create(exec, StagingRole::Source, 0, "ledger.accounts", &columns())
        .await
        .unwrap();
    assert!(table.name.starts_with(&format!("stg_{}_src0_", exec.simple())));
    assert_eq!(table.created_at, epoch());
    assert_eq!(table.ttl_expires_at, epoch() + ChronoDuration::hours(1));
    assert_eq!(stored(&manager, &table).await.state, StagingState::Created);

    clock.advance(ChronoDuration::minutes(10));
    manager
        .load(&mut table, vec![vec![json!("A-1"), json!(10.5)], vec![json!("A-2"), json!(-3)]])
        .await
        .unwrap();
    assert_eq!(stored(&manager, &table).await.row_count, 2);

    clock.advance(ChronoDuration::minutes(10));
    manager.create_indexes(&mut table, &columns()[..1]).await.unwrap();

    clock.advance(ChronoDuration::minutes(10));
    manager.transition(&mut table, StagingState::Queried).await.unwrap();

    clock.advance(ChronoDuration::minutes(10));
    manager.transition(&mut table, StagingState::Retained).await.unwrap();

    let row = stored(&manager, &table).await;
    assert_eq!(row.state, StagingState::Retained);
    assert_eq!(row.indexes_created, vec!["account_no"]);
    assert_eq!(row.created_at, epoch());
    assert_eq!(row.ttl_expires_at, clock.now() + ChronoDuration::hours(1));
    assert_eq!(row.origin_table, "ledger.accounts");
    assert_eq!(row.columns, vec!["account_no", "balance"]);
}

#[tokio::test]
async fn test_rejected_transition_leaves_catalog_unchanged() {
    let (manager, _) = open(Arc::new(SqliteDatabase::open_in_memory().unwrap()), Duration::from_secs(3600)).await;
    let mut table = manager
        .create(Uuid::new_v4(), StagingRole::Target, 0, "bank", &columns())
        .await
        .unwrap();
    manager.transition(&mut table, StagingState::Retained).await.unwrap();

    for next in [StagingState::Created, StagingState::Queried, StagingState::Retained] {
        let err = manager.transition(&mut table, next).await.unwrap_err();
        assert!(matches!(err, StagingError::InvalidTransition { .. }), "{next}");
    }
    assert_eq!(table.state, StagingState::Retained);
    assert_eq!(stored(&manager, &table).await.state, StagingState::Retained);
}

#[tokio::test]
async fn test_retain_all_from_mixed_states() {
    let (manager, _) = open(Arc::new(SqliteDatabase::open_in_memory().unwrap()), Duration::from_secs(3600)).await;
    let exec = Uuid::new_v4();
    let mut tables = Vec::new();
    for ordinal in 0..3 {
        tables.push(
            manager
                .create(exec, StagingRole::Source, ordinal, "ledger", &columns())
                .await
                .unwrap(),
        );
    }
    manager.load(&mut tables[1], vec![vec![json!("A-1"), json!(1)]]).await.unwrap();
    manager.transition(&mut tables[2], StagingState::Retained).await.unwrap();

    let warnings: Vec<Warning> = manager.retain_all(&mut tables).await;
    assert!(warnings.is_empty());

    let rows = manager.catalog().list_for_execution(&exec).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|t| t.state == StagingState::Retained));
    assert_eq!(rows.iter().map(|t| t.ordinal).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_catalog_is_scoped_per_execution() {
    let (manager, _) = open(Arc::new(SqliteDatabase::open_in_memory().unwrap()), Duration::from_secs(3600)).await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    manager.create(a, StagingRole::Source, 0, "ledger", &columns()).await.unwrap();
    manager.create(a, StagingRole::Target, 0, "bank", &columns()).await.unwrap();
    manager.create(b, StagingRole::Source, 0, "ledger", &columns()).await.unwrap();

    let owned_by_a = manager.catalog().list_for_execution(&a).await.unwrap();
    assert_eq!(owned_by_a.len(), 2);
    assert_eq!(owned_by_a[0].role, StagingRole::Source);
    assert_eq!(owned_by_a[1].role, StagingRole::Target);
    assert_eq!(manager.catalog().list_for_execution(&b).await.unwrap().len(), 1);
    assert_eq!(manager.live_tables(), 3);

    manager.release(&a);
    assert_eq!(manager.live_tables(), 1);
}

#[tokio::test]
async fn test_catalog_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("landing.db");
    let name = {
        let landing = Arc::new(SqliteDatabase::open(&path).unwrap());
        let (manager, _) = open(landing, Duration::from_secs(3600)).await;
        let table = manager
            .create(Uuid::new_v4(), StagingRole::Source, 0, "ledger", &columns())
            .await
            .unwrap();
        table.name
    };

    let landing = Arc::new(SqliteDatabase::open(&path).unwrap());
    let (manager, _) = open(landing.clone(), Duration::from_secs(3600)).await;
    let row = manager.catalog().get(&name).await.unwrap().unwrap();
    assert_eq!(row.state, StagingState::Created);
    landing.table_schema(&name).await.unwrap();
}

/// Landing database that applies statements matching `slow` and then replies
/// too late, counting how often they are issued.
#[derive(Debug)]
struct LateReply {
    inner: SqliteDatabase,
    slow: fn(&str) -> bool,
    issued: AtomicUsize,
}

impl LateReply {
    fn new(slow: fn(&str) -> bool) -> Self {
        Self {
            inner: SqliteDatabase::open_in_memory().unwrap(),
            slow,
            issued: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SchemaProvider for LateReply {
    async fn table_schema(&self, table: &str) -> DbResult<TableSchema> {
        self.inner.table_schema(table).await
    }
}

#[async_trait]
impl Database for LateReply {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn query(&self, sql: &str) -> DbResult<QueryRows> {
        self.inner.query(sql).await
    }

    async fn execute(&self, sql: &str) -> DbResult<u64> {
        let affected = self.inner.execute(sql).await?;
        if (self.slow)(sql) {
            self.issued.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(affected)
    }

    async fn estimate_row_count(&self, table: &str) -> DbResult<u64> {
        self.inner.estimate_row_count(table).await
    }

    async fn bulk_load(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> DbResult<BulkLoadStatus> {
        self.inner.bulk_load(table, columns, rows).await
    }
}

async fn create_against(landing: Arc<LateReply>) -> Result<StagingTable, StagingError> {
    let config = RunConfig::default()
        .with_query_timeout(Duration::from_millis(50))
        .with_retries(3, Duration::from_millis(1));
    let manager = StagingManager::open(landing, &config, Arc::new(ManualClock::new(epoch())))
        .await
        .unwrap();
    manager
        .create(Uuid::new_v4(), StagingRole::Source, 0, "ledger", &columns())
        .await
}

#[tokio::test]
async fn test_timed_out_create_table_is_not_reissued() {
    let landing = Arc::new(LateReply::new(|sql| sql.starts_with("CREATE TABLE") && sql.contains("stg_")));
    let err = create_against(landing.clone()).await.unwrap_err();

    assert!(matches!(err, StagingError::Db(DbError::Timeout(50))), "{err}");
    assert_eq!(landing.issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timed_out_catalog_insert_is_not_reissued() {
    let landing = Arc::new(LateReply::new(|sql| sql.starts_with("INSERT INTO") && sql.contains("recon_staging_catalog")));
    let err = create_against(landing.clone()).await.unwrap_err();

    assert!(matches!(err, StagingError::Db(DbError::Timeout(50))), "{err}");
    assert_eq!(landing.issued.load(Ordering::SeqCst), 1);
}

/// SQLite underneath, but reporting a dialect that cannot index unbounded text.
#[derive(Debug)]
struct ReportsMySql(SqliteDatabase);

#[async_trait]
impl SchemaProvider for ReportsMySql {
    async fn table_schema(&self, table: &str) -> DbResult<TableSchema> {
        self.0.table_schema(table).await
    }
}

#[async_trait]
impl Database for ReportsMySql {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn query(&self, sql: &str) -> DbResult<QueryRows> {
        self.0.query(sql).await
    }

    async fn execute(&self, sql: &str) -> DbResult<u64> {
        self.0.execute(sql).await
    }

    async fn estimate_row_count(&self, table: &str) -> DbResult<u64> {
        self.0.estimate_row_count(table).await
    }

    async fn bulk_load(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> DbResult<BulkLoadStatus> {
        self.0.bulk_load(table, columns, rows).await
    }
}

#[tokio::test]
async fn test_unbounded_text_index_is_skipped() {
    let landing = Arc::new(ReportsMySql(SqliteDatabase::open_in_memory().unwrap()));
    let (manager, _) = open(landing, Duration::from_secs(3600)).await;
    let mut columns = columns();
    columns.push(ColumnSchema::new("memo", "text"));

    let mut table = manager
        .create(Uuid::new_v4(), StagingRole::Source, 0, "ledger", &columns)
        .await
        .unwrap();
    manager
        .load(&mut table, vec![vec![json!("A-1"), json!(1), json!("opening")]])
        .await
        .unwrap();
    let outcome = manager.create_indexes(&mut table, &columns).await.unwrap();

    assert!(matches!(
        outcome.columns.iter().find(|(c, _)| c == "memo"),
        Some((_, IndexStatus::Skipped(_)))
    ));
    assert_eq!(outcome.created(), vec!["account_no", "balance"]);
    let warnings = outcome.warnings(&table.name);
    assert_eq!(warnings.len(), 1);
    assert!(matches!(&warnings[0], Warning::IndexCreationFailed { column, .. } if column == "memo"));
    assert_eq!(stored(&manager, &table).await.indexes_created, vec!["account_no", "balance"]);
}
