//! Configuration module for the reconciler.
//!
//! Handles connection configuration, environment variables, settings files
//! and the immutable per-run configuration objects.

mod connection;
mod run;
mod settings;

pub use connection::{ConnectionConfig, ConnectionError, Driver};
pub use run::{ModePreference, RuleConfig, RunConfig, SimilarityTier};
pub use settings::{
    expand_env_vars, parse_duration, ConnectionSettings, ExecutionSettings, PoolSettings,
    RuleSettings, Settings, SettingsError, SinkSettings, StagingSettings, StoreSettings,
    WorkerSettings,
};
