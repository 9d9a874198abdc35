//! Immutable run configuration.
//!
//! Thresholds, caps and timeouts are passed explicitly into the rule
//! pipeline and the execution coordinator so concurrent runs can use
//! different values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::rules::SimilarityTier;

/// Configuration for rule generation and filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rules below this confidence are excluded by the filter.
    pub min_confidence: f64,
    /// Maximum rules kept per (source_table, target_table) pair.
    pub per_pair_cap: usize,
    /// Maximum enhancer-sourced rules accepted per table pair.
    pub enhancer_cap: usize,
    /// Confidence assigned to exact-tier name matches.
    pub pattern_confidence: f64,
    /// Lowest name-similarity tier that still produces a candidate.
    pub min_similarity: SimilarityTier,
    /// Upper bound on a single enhancer call.
    #[serde(with = "duration_ms")]
    pub enhancer_timeout: Duration,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            per_pair_cap: 3,
            enhancer_cap: 5,
            pattern_confidence: 0.75,
            min_similarity: SimilarityTier::Stem,
            enhancer_timeout: Duration::from_secs(20),
        }
    }
}

impl RuleConfig {
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_per_pair_cap(mut self, cap: usize) -> Self {
        self.per_pair_cap = cap;
        self
    }

    pub fn with_enhancer_cap(mut self, cap: usize) -> Self {
        self.enhancer_cap = cap;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            ));
        }
        if !(0.0..=1.0).contains(&self.pattern_confidence) {
            return Err(format!(
                "pattern_confidence must be within [0, 1], got {}",
                self.pattern_confidence
            ));
        }
        if self.per_pair_cap == 0 {
            return Err("per_pair_cap must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Caller preference for execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModePreference {
    /// Staged when a landing database exists and row estimates exceed the threshold.
    #[default]
    Auto,
    Federated,
    Staged,
}

/// Configuration for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Row-count estimate above which staging is chosen.
    pub staging_threshold_rows: u64,
    /// Timeout applied to every database call.
    #[serde(with = "duration_ms")]
    pub query_timeout: Duration,
    /// Retries for retriable database errors (attempts = retries + 1).
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    #[serde(with = "duration_ms")]
    pub retry_backoff: Duration,
    /// Rows per multi-row INSERT in the batch fallback.
    pub insert_batch_size: usize,
    /// Expected wall time of a run, used for the REI speed factor.
    #[serde(with = "duration_ms")]
    pub target_time: Duration,
    /// Staging table retention after the last state change.
    #[serde(with = "duration_ms")]
    pub retention: Duration,
    /// Catalog table holding staging table records.
    pub catalog_table: String,
    pub mode: ModePreference,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            staging_threshold_rows: 50_000,
            query_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            insert_batch_size: 500,
            target_time: Duration::from_secs(60),
            retention: Duration::from_secs(24 * 3600),
            catalog_table: "recon_staging_catalog".to_string(),
            mode: ModePreference::Auto,
        }
    }
}

impl RunConfig {
    pub fn with_mode(mut self, mode: ModePreference) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_staging_threshold(mut self, rows: u64) -> Self {
        self.staging_threshold_rows = rows;
        self
    }

    pub fn with_insert_batch_size(mut self, size: usize) -> Self {
        self.insert_batch_size = size;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), String> {
        if self.insert_batch_size == 0 {
            return Err("insert_batch_size must be at least 1".to_string());
        }
        if self.query_timeout.is_zero() {
            return Err("query_timeout must be non-zero".to_string());
        }
        if self.catalog_table.trim().is_empty() {
            return Err("catalog_table must not be empty".to_string());
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
