//! Worker communication module.
//!
//! Remote databases (Postgres, MySQL, SQL Server, DuckDB) are reached
//! through a long-running worker process that owns the native drivers.
//! The reconciler talks to it over NDJSON on stdin/stdout:
//!
//! ```text
//!   Reconciler (Rust + Tokio)                 Worker (child process)
//!   ┌──────────────────────────┐  stdin       ┌───────────────────────┐
//!   │ WorkerClient             │ ───────────▶ │ metadata.get_columns  │
//!   │  - request ids           │              │ metadata.get_row_count│
//!   │  - per-request timeout   │ ◀─────────── │ query.execute         │
//!   │  - error classification  │  stdout      │ bulk.load             │
//!   └──────────────────────────┘              └───────────────────────┘
//! ```
//!
//! [`crate::db::WorkerDatabase`] wraps a client and a connection as a
//! [`crate::db::Database`].

mod client;
mod error;
pub mod protocol;

pub use client::WorkerClient;
pub use error::{WorkerError, WorkerResult};
