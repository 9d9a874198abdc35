//! Expiry sweep for staging tables.
//!
//! Independent of any run: it reads the catalog, drops tables whose TTL has
//! passed and marks them `EXPIRED`. A table whose TTL is still in the
//! future is never touched, whatever its state. Running it twice in a row
//! is harmless; the second pass finds nothing to do.

use serde::Serialize;

use super::catalog::StagingCatalog;
use super::clock::Clock;
use super::state::StagingState;
use super::StagingResult;
use crate::sql::DropTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub table: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Catalog rows past their TTL at sweep time.
    pub examined: usize,
    pub dropped: Vec<String>,
    /// Tables left for the next sweep.
    pub failed: Vec<SweepFailure>,
}

/// Drop every staging table past its TTL.
///
/// Per-table failures are reported, not raised; only an unreadable catalog
/// fails the sweep as a whole.
pub async fn sweep_expired(catalog: &StagingCatalog, clock: &dyn Clock) -> StagingResult<SweepReport> {
    let now = clock.now();
    let candidates = catalog.expired(now).await?;
    let db = catalog.database();
    let dialect = db.dialect();

    let mut report = SweepReport {
        examined: candidates.len(),
        ..SweepReport::default()
    };

    for mut table in candidates {
        let ddl = DropTable::new(&table.name).if_exists().to_sql(dialect);
        if let Err(e) = catalog
            .policy()
            .call("drop staging table", || db.execute(&ddl))
            .await
        {
            tracing::warn!(table = %table.name, error = %e, "failed to drop expired staging table");
            report.failed.push(SweepFailure {
                table: table.name,
                reason: e.to_string(),
            });
            continue;
        }

        table.state = StagingState::Expired;
        if let Err(e) = catalog.update(&table).await {
            // Dropped but still listed; the next sweep repeats the DROP IF EXISTS.
            tracing::warn!(table = %table.name, error = %e, "dropped staging table but could not mark it expired");
            report.failed.push(SweepFailure {
                table: table.name,
                reason: e.to_string(),
            });
            continue;
        }

        tracing::info!(
            table = %table.name,
            execution_id = %table.execution_id,
            expired_at = %table.ttl_expires_at,
            "dropped expired staging table"
        );
        report.dropped.push(table.name);
    }

    tracing::info!(
        examined = report.examined,
        dropped = report.dropped.len(),
        failed = report.failed.len(),
        "staging sweep finished"
    );
    Ok(report)
}
