//! # Reconciler
//!
//! Generates column-matching rules between a source and a target table and
//! executes them, either federated across the two databases or staged into a
//! local landing database, deriving coverage and quality KPIs per run.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │ source schema            │   │ target schema            │
//! └────────────┬─────────────┘   └────────────┬─────────────┘
//!              └───────────────┬──────────────┘
//!                              ▼ [rules: generator + enhancer + filter]
//! ┌─────────────────────────────────────────────────────────┐
//! │                RuleSet (immutable, stored)               │
//! └─────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼ [engine: coordinator]
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │ federated: per-side keys │   │ staged: extract → stage  │
//! │ compared in the engine   │   │ → one summary per rule   │
//! └────────────┬─────────────┘   └────────────┬─────────────┘
//!              └───────────────┬──────────────┘
//!                              ▼ [kpi]
//! ┌─────────────────────────────────────────────────────────┐
//! │        ExecutionRecord (counts, KPIs) → result sink      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`rules`]: candidate generation, enhancer seam, filtering, ruleset stores
//! - [`engine`]: execution coordinator, join/aggregation SQL, result sinks
//! - [`staging`]: staging table lifecycle, catalog and expiry sweep
//! - [`db`]: database seam, SQLite and worker-backed implementations
//! - [`sql`]: dialects and DDL/DML builders
//! - [`kpi`]: RCR, DQCS and REI
//! - [`config`]: settings file and run configuration

pub mod config;
pub mod db;
pub mod engine;
pub mod hash;
pub mod kpi;
pub mod rules;
pub mod sql;
pub mod staging;
pub mod warning;
pub mod worker;

pub use config::{ModePreference, RuleConfig, RunConfig};
pub use engine::{ExecutionCoordinator, ExecutionFailure, ExecutionRecord};
pub use rules::{ReconciliationRule, RuleSet};
pub use sql::Dialect;
pub use warning::Warning;
