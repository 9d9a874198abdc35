//! Reconciliation KPIs.
//!
//! | KPI  | Formula                                           | Critical | Warning |
//! |------|---------------------------------------------------|----------|---------|
//! | RCR  | Σ matched / Σ total_source × 100                  | < 80     | < 90    |
//! | DQCS | Σ (matched × confidence) / Σ matched              | < 0.70   | < 0.80  |
//! | REI  | match_rate × rule_utilization% × speed_factor% / 100 | < 50  | < 70    |
//!
//! Sums run over the rules of one execution. A zero denominator yields value
//! `0.0` with status `N/A` rather than an error, with one exception: when
//! rules exist but nothing matched, DQCS is the mean rule confidence, so a
//! zero-match run still reports how trustworthy its rules were.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KpiStatus {
    #[serde(rename = "HEALTHY")]
    Healthy,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "CRITICAL")]
    Critical,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl fmt::Display for KpiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KpiStatus::Healthy => "HEALTHY",
            KpiStatus::Warning => "WARNING",
            KpiStatus::Critical => "CRITICAL",
            KpiStatus::NotApplicable => "N/A",
        })
    }
}

/// A metric value with its band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KpiValue {
    pub value: f64,
    pub status: KpiStatus,
}

impl KpiValue {
    fn not_applicable() -> Self {
        Self {
            value: 0.0,
            status: KpiStatus::NotApplicable,
        }
    }

    fn banded(value: f64, critical_below: f64, warning_below: f64) -> Self {
        let status = if value < critical_below {
            KpiStatus::Critical
        } else if value < warning_below {
            KpiStatus::Warning
        } else {
            KpiStatus::Healthy
        };
        Self { value, status }
    }
}

/// Per-rule figures the KPIs are derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleCounts {
    pub matched: u64,
    pub total_source: u64,
    pub confidence: f64,
}

/// Snapshot stored on the execution record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    /// Reconciliation Coverage Rate, percent.
    pub rcr: KpiValue,
    /// Data Quality Confidence Score, 0 to 1.
    pub dqcs: KpiValue,
    /// Reconciliation Efficiency Index, 0 to 100.
    pub rei: KpiValue,
}

pub fn rcr(matched: u64, total_source: u64) -> KpiValue {
    if total_source == 0 {
        return KpiValue::not_applicable();
    }
    KpiValue::banded(matched as f64 / total_source as f64 * 100.0, 80.0, 90.0)
}

pub fn dqcs(rules: &[RuleCounts]) -> KpiValue {
    if rules.is_empty() {
        return KpiValue::not_applicable();
    }
    let matched: u64 = rules.iter().map(|r| r.matched).sum();
    let value = if matched == 0 {
        rules.iter().map(|r| r.confidence).sum::<f64>() / rules.len() as f64
    } else {
        rules
            .iter()
            .map(|r| r.matched as f64 * r.confidence)
            .sum::<f64>()
            / matched as f64
    };
    KpiValue::banded(value, 0.70, 0.80)
}

/// `match_rate` is a ratio (0 to 1); utilization and speed are percentages,
/// speed capped at 100, so the index tops out at 100.
pub fn rei(
    matched: u64,
    total_source: u64,
    active_rules: usize,
    total_rules: usize,
    target_time: Duration,
    actual_time: Duration,
) -> KpiValue {
    if total_source == 0 || total_rules == 0 || actual_time.is_zero() {
        return KpiValue::not_applicable();
    }
    let match_rate = matched as f64 / total_source as f64;
    let utilization = active_rules as f64 / total_rules as f64 * 100.0;
    let speed = (target_time.as_secs_f64() / actual_time.as_secs_f64() * 100.0).min(100.0);
    KpiValue::banded(match_rate * utilization * speed / 100.0, 50.0, 70.0)
}

/// Compute all three KPIs for one execution.
pub fn compute(
    rules: &[RuleCounts],
    total_rules: usize,
    target_time: Duration,
    actual_time: Duration,
) -> KpiSnapshot {
    let matched: u64 = rules.iter().map(|r| r.matched).sum();
    let total_source: u64 = rules.iter().map(|r| r.total_source).sum();
    let active = rules.iter().filter(|r| r.matched > 0).count();
    KpiSnapshot {
        rcr: rcr(matched, total_source),
        dqcs: dqcs(rules),
        rei: rei(matched, total_source, active, total_rules, target_time, actual_time),
    }
}
