//! Landing-database staging.
//!
//! A staged run extracts each source and target table it needs once, loads
//! the slices into uniquely named tables in the landing database, indexes
//! the join columns where it can, and lets every rule run as local SQL.
//!
//! Ownership is explicit: each [`StagingTable`] belongs to one execution id
//! and carries a lifecycle [`StagingState`] and a TTL. Runs never drop
//! tables; [`sweep_expired`] is the only thing that does, and only once the
//! TTL has passed. All TTL arithmetic goes through a [`Clock`].

mod catalog;
mod clock;
mod manager;
mod state;
mod sweep;
mod table;

pub use catalog::StagingCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{IndexOutcome, IndexStatus, LoadOutcome, StagingManager};
pub use state::StagingState;
pub use sweep::{sweep_expired, SweepFailure, SweepReport};
pub use table::{index_name, staging_table_name, StagingRole, StagingTable};

use thiserror::Error;

use crate::db::DbError;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("invalid staging transition for {table}: {from} -> {to}")]
    InvalidTransition {
        table: String,
        from: StagingState,
        to: StagingState,
    },

    #[error("staging table name already in use: {0}")]
    NameCollision(String),

    #[error("staging catalog error: {0}")]
    Catalog(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StagingResult<T> = Result<T, StagingError>;
