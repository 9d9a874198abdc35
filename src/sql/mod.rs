//! SQL generation.
//!
//! Dialect-aware builders for the statements the reconciler issues against
//! source, target and landing databases. Reconciliation queries themselves
//! are assembled in [`crate::engine::sql`] from these pieces.

pub mod ddl;
pub mod dialect;
pub mod dml;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use ddl::{ColumnDef, CreateIndex, CreateTable, DropTable};
pub use dialect::{Dialect, SqlDialect};
pub use dml::{render_literal, Insert, Update};
pub use types::{ColumnType, TypeFamily};
