//! TOML-based configuration for the reconciler.
//!
//! Supports a config file (reconciler.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [connections.erp]
//! driver = "postgres"
//! connection_string = "${ERP_DATABASE_URL}"
//!
//! [connections.ledger]
//! driver = "mssql"
//! host = "ledger-db"
//! database = "finance"
//! username = "recon_ro"
//! password = "${LEDGER_PASSWORD}"
//! default_schema = "dbo"
//!
//! [connections.landing]
//! driver = "sqlite"
//! connection_string = "./landing.db"
//!
//! [worker]
//! path = "./reconciler-worker"
//! request_timeout = "60s"
//!
//! [rules]
//! min_confidence = 0.7
//! per_pair_cap = 3
//!
//! [execution]
//! staging_threshold_rows = 50000
//! query_timeout = "30s"
//!
//! [staging]
//! retention = "24h"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::connection::{ConnectionConfig, Driver};
use super::run::{RuleConfig, RunConfig, SimilarityTier};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Invalid duration format: {0}")]
    InvalidDuration(String),

    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Named database connections.
    pub connections: HashMap<String, ConnectionSettings>,

    /// Database worker configuration.
    pub worker: WorkerSettings,

    /// Rule generation and filtering thresholds.
    pub rules: RuleSettings,

    /// Execution coordinator settings.
    pub execution: ExecutionSettings,

    /// Staging (landing database) settings.
    pub staging: StagingSettings,

    /// Ruleset store location.
    pub store: StoreSettings,

    /// Result sink location.
    pub sink: SinkSettings,
}

/// Connection configuration.
///
/// Either `connection_string` or the discrete host/database fields must be set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Database driver (postgres, mysql, mssql, duckdb, sqlite).
    pub driver: String,

    /// Connection string (supports ${ENV_VAR} expansion).
    pub connection_string: Option<String>,

    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Default schema for unqualified table names.
    pub default_schema: Option<String>,
}

impl ConnectionSettings {
    /// Get the driver type.
    pub fn driver_type(&self) -> Result<Driver, SettingsError> {
        Driver::parse(&self.driver)
            .map_err(|_| SettingsError::UnsupportedDriver(self.driver.clone()))
    }

    /// Get the connection string with environment variables expanded.
    ///
    /// Falls back to assembling one from the discrete fields.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        if let Some(cs) = &self.connection_string {
            return expand_env_vars(cs);
        }
        let config = self.to_connection_config()?;
        Ok(config.connection_string())
    }

    /// Build a structured connection config from the discrete fields.
    pub fn to_connection_config(&self) -> Result<ConnectionConfig, SettingsError> {
        let driver = self.driver_type()?;
        let host = self
            .host
            .as_deref()
            .map(expand_env_vars)
            .transpose()?
            .ok_or_else(|| {
                SettingsError::InvalidConfig(format!(
                    "connection for driver '{}' needs either connection_string or host",
                    self.driver
                ))
            })?;

        Ok(ConnectionConfig {
            driver,
            host,
            port: self.port,
            database: self
                .database
                .as_deref()
                .map(expand_env_vars)
                .transpose()?
                .unwrap_or_default(),
            username: self.username.as_deref().map(expand_env_vars).transpose()?,
            password: self.password.as_deref().map(expand_env_vars).transpose()?,
        })
    }
}

/// Database worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Path to the worker binary.
    pub path: Option<String>,

    /// Per-request timeout (e.g., "30s").
    pub request_timeout: String,

    /// Connection pool settings.
    pub pool: PoolSettings,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            path: None,
            request_timeout: "30s".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

/// Connection pool settings passed to the worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_idle_conns: u32,
    pub max_open_conns: u32,
    pub conn_max_lifetime: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle_conns: 2,
            max_open_conns: 4,
            conn_max_lifetime: "5m".to_string(),
        }
    }
}

impl PoolSettings {
    /// Convert to worker command-line arguments.
    pub fn to_worker_args(&self) -> Vec<String> {
        vec![
            "-pool".to_string(),
            format!("-pool-max-idle={}", self.max_idle_conns),
            format!("-pool-max-open={}", self.max_open_conns),
            format!("-pool-conn-lifetime={}", self.conn_max_lifetime),
        ]
    }
}

/// Rule generation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleSettings {
    pub min_confidence: f64,
    pub per_pair_cap: usize,
    pub enhancer_cap: usize,
    pub pattern_confidence: f64,
    /// Minimum name-similarity tier: "exact" or "stem".
    pub min_similarity: String,
}

impl Default for RuleSettings {
    fn default() -> Self {
        let defaults = RuleConfig::default();
        Self {
            min_confidence: defaults.min_confidence,
            per_pair_cap: defaults.per_pair_cap,
            enhancer_cap: defaults.enhancer_cap,
            pattern_confidence: defaults.pattern_confidence,
            min_similarity: "stem".to_string(),
        }
    }
}

/// Execution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub staging_threshold_rows: u64,
    pub query_timeout: String,
    pub max_retries: u32,
    pub retry_backoff: String,
    pub insert_batch_size: usize,
    pub target_time: String,
    pub enhancer_timeout: String,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            staging_threshold_rows: 50_000,
            query_timeout: "30s".to_string(),
            max_retries: 3,
            retry_backoff: "500ms".to_string(),
            insert_batch_size: 500,
            target_time: "60s".to_string(),
            enhancer_timeout: "20s".to_string(),
        }
    }
}

/// Staging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StagingSettings {
    /// How long staging tables are kept after their last state change.
    pub retention: String,

    /// Name of the catalog table in the landing database.
    pub catalog_table: String,
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            retention: "24h".to_string(),
            catalog_table: "recon_staging_catalog".to_string(),
        }
    }
}

/// Ruleset store settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Path to the SQLite ruleset store. Defaults to `~/.reconciler/rulesets.db`.
    pub path: Option<String>,
}

/// Result sink settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Path to the NDJSON execution log. Defaults to `~/.reconciler/executions.jsonl`.
    pub path: Option<String>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `RECONCILER_CONFIG`
    /// 2. `./reconciler.toml`
    /// 3. `~/.config/reconciler/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("RECONCILER_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("reconciler.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("reconciler").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Get a connection by name.
    pub fn get_connection(&self, name: &str) -> Result<&ConnectionSettings, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))
    }

    /// Build the rule configuration from the `[rules]` section.
    pub fn rule_config(&self) -> Result<RuleConfig, SettingsError> {
        let min_similarity = match self.rules.min_similarity.to_lowercase().as_str() {
            "exact" => SimilarityTier::Exact,
            "stem" => SimilarityTier::Stem,
            other => {
                return Err(SettingsError::InvalidConfig(format!(
                    "rules.min_similarity must be 'exact' or 'stem', got '{other}'"
                )))
            }
        };

        let config = RuleConfig {
            min_confidence: self.rules.min_confidence,
            per_pair_cap: self.rules.per_pair_cap,
            enhancer_cap: self.rules.enhancer_cap,
            pattern_confidence: self.rules.pattern_confidence,
            min_similarity,
            enhancer_timeout: parse_duration(&self.execution.enhancer_timeout)?,
        };
        config.validate().map_err(SettingsError::InvalidConfig)?;
        Ok(config)
    }

    /// Build the run configuration from the `[execution]` and `[staging]` sections.
    pub fn run_config(&self) -> Result<RunConfig, SettingsError> {
        let exec = &self.execution;
        let config = RunConfig {
            staging_threshold_rows: exec.staging_threshold_rows,
            query_timeout: parse_duration(&exec.query_timeout)?,
            max_retries: exec.max_retries,
            retry_backoff: parse_duration(&exec.retry_backoff)?,
            insert_batch_size: exec.insert_batch_size,
            target_time: parse_duration(&exec.target_time)?,
            retention: parse_duration(&self.staging.retention)?,
            catalog_table: self.staging.catalog_table.clone(),
            ..RunConfig::default()
        };
        config.validate().map_err(SettingsError::InvalidConfig)?;
        Ok(config)
    }

    /// Resolve the ruleset store path.
    pub fn store_path(&self) -> Result<PathBuf, SettingsError> {
        match &self.store.path {
            Some(p) => Ok(PathBuf::from(expand_env_vars(p)?)),
            None => data_dir().map(|d| d.join("rulesets.db")),
        }
    }

    /// Resolve the result sink path.
    pub fn sink_path(&self) -> Result<PathBuf, SettingsError> {
        match &self.sink.path {
            Some(p) => Ok(PathBuf::from(expand_env_vars(p)?)),
            None => data_dir().map(|d| d.join("executions.jsonl")),
        }
    }
}

fn data_dir() -> Result<PathBuf, SettingsError> {
    dirs::home_dir()
        .map(|h| h.join(".reconciler"))
        .ok_or_else(|| SettingsError::InvalidConfig("cannot determine home directory".into()))
}

/// Parse a duration string such as `"500ms"`, `"30s"`, `"5m"`, `"24h"` or `"2d"`.
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, SettingsError> {
    let trimmed = s.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| SettingsError::InvalidDuration(s.to_string()))?;

    let invalid = || SettingsError::InvalidDuration(s.to_string());
    let secs = |factor: u64| value.checked_mul(factor).map(Duration::from_secs).ok_or_else(invalid);
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => secs(60),
        "h" => secs(3600),
        "d" => secs(86_400),
        _ => Err(invalid()),
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
