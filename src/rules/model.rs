//! Rule and ruleset types.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::{compute_hash, short_hash};
use crate::warning::Warning;

/// How column values are compared.
///
/// Declaration order is the tie-break preference: exact before fuzzy before semantic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Raw values are equal.
    #[default]
    Exact,
    /// Values equal after trimming and lower-casing their text form.
    Fuzzy,
    /// Proposed by a semantic source; compared like `Fuzzy`.
    Semantic,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Semantic => "semantic",
        }
    }

    /// Whether comparison goes through the normalised text form.
    pub fn is_normalised(&self) -> bool {
        !matches!(self, MatchType::Exact)
    }
}

/// Where a rule came from.
///
/// Declaration order is the tie-break preference. Candidates that omit the
/// field deserialize as `Llm`, since only external proposers supply JSON rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum RuleOrigin {
    #[serde(rename = "explicit-pair")]
    ExplicitPair,
    #[serde(rename = "pattern")]
    Pattern,
    #[default]
    #[serde(rename = "llm")]
    Llm,
}

impl RuleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOrigin::ExplicitPair => "explicit-pair",
            RuleOrigin::Pattern => "pattern",
            RuleOrigin::Llm => "llm",
        }
    }
}

/// A predicate on one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    IsNull,
    IsNotNull,
}

/// Row filters applied to each side before matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterConditions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source: BTreeMap<String, Predicate>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub target: BTreeMap<String, Predicate>,
}

impl FilterConditions {
    pub fn is_empty(&self) -> bool {
        self.source.is_empty() && self.target.is_empty()
    }
}

/// Duplicate-detection key: sorted columns per side plus match type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Signature {
    pub source_columns: Vec<String>,
    pub target_columns: Vec<String>,
    pub match_type: MatchType,
}

/// One column-matching rule between a source and a target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRule {
    #[serde(default)]
    pub rule_id: String,
    #[serde(default)]
    pub rule_name: String,
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    #[serde(default)]
    pub match_type: MatchType,
    pub confidence_score: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "FilterConditions::is_empty")]
    pub filter_conditions: FilterConditions,
    #[serde(default)]
    pub origin: RuleOrigin,
}

impl ReconciliationRule {
    /// Build a rule with a stable id and a default name.
    pub fn new(
        source_table: impl Into<String>,
        source_columns: Vec<String>,
        target_table: impl Into<String>,
        target_columns: Vec<String>,
        match_type: MatchType,
        confidence_score: f64,
        origin: RuleOrigin,
    ) -> Self {
        let mut rule = Self {
            rule_id: String::new(),
            rule_name: String::new(),
            source_table: source_table.into(),
            source_columns,
            target_table: target_table.into(),
            target_columns,
            match_type,
            confidence_score,
            reasoning: String::new(),
            filter_conditions: FilterConditions::default(),
            origin,
        };
        rule.normalise_identity();
        rule
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_filters(mut self, filters: FilterConditions) -> Self {
        self.filter_conditions = filters;
        self
    }

    /// Recompute `rule_id` and fill `rule_name` when blank.
    pub fn normalise_identity(&mut self) {
        self.rule_id = self.stable_id();
        if self.rule_name.trim().is_empty() {
            self.rule_name = format!(
                "{}.{} = {}.{}",
                self.source_table,
                self.source_columns.join("+"),
                self.target_table,
                self.target_columns.join("+")
            );
        }
    }

    /// `rule_` + 16 hex chars derived from the tables and signature.
    pub fn stable_id(&self) -> String {
        let sig = self.signature();
        let key = format!(
            "{}|{}|{}|{}|{}",
            self.source_table,
            self.target_table,
            sig.source_columns.join(","),
            sig.target_columns.join(","),
            sig.match_type.as_str()
        );
        format!("rule_{}", short_hash(&key))
    }

    pub fn signature(&self) -> Signature {
        let mut source_columns = self.source_columns.clone();
        let mut target_columns = self.target_columns.clone();
        source_columns.sort();
        target_columns.sort();
        Signature {
            source_columns,
            target_columns,
            match_type: self.match_type,
        }
    }

    /// Number of column pairs.
    pub fn arity(&self) -> usize {
        self.source_columns.len()
    }

    /// Structural checks: non-empty, equal arity, confidence in [0, 1].
    pub fn validate(&self) -> Result<(), String> {
        if self.source_table.trim().is_empty() || self.target_table.trim().is_empty() {
            return Err(format!("rule '{}' has an empty table name", self.rule_name));
        }
        if self.source_columns.is_empty() {
            return Err(format!("rule '{}' has no source columns", self.rule_name));
        }
        if self.source_columns.len() != self.target_columns.len() {
            return Err(format!(
                "rule '{}' has {} source columns but {} target columns",
                self.rule_name,
                self.source_columns.len(),
                self.target_columns.len()
            ));
        }
        if self
            .source_columns
            .iter()
            .chain(&self.target_columns)
            .any(|c| c.trim().is_empty())
        {
            return Err(format!("rule '{}' has an empty column name", self.rule_name));
        }
        if !self.confidence_score.is_finite() || !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(format!(
                "rule '{}' has confidence {} outside [0, 1]",
                self.rule_name, self.confidence_score
            ));
        }
        Ok(())
    }
}

/// Canonical rule order: confidence desc, then match type, origin, tables, columns.
pub fn rule_order(a: &ReconciliationRule, b: &ReconciliationRule) -> Ordering {
    b.confidence_score
        .total_cmp(&a.confidence_score)
        .then_with(|| a.match_type.cmp(&b.match_type))
        .then_with(|| a.origin.cmp(&b.origin))
        .then_with(|| a.source_table.cmp(&b.source_table))
        .then_with(|| a.target_table.cmp(&b.target_table))
        .then_with(|| a.source_columns.cmp(&b.source_columns))
        .then_with(|| a.target_columns.cmp(&b.target_columns))
}

/// An immutable, ordered set of rules for one schema pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub ruleset_id: String,
    pub rules: Vec<ReconciliationRule>,
    pub source_schema: String,
    pub target_schema: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    /// SHA256 of the ordered rule list.
    pub fingerprint: String,
}

impl RuleSet {
    /// Create a ruleset with a fresh id.
    pub fn new(
        source_schema: impl Into<String>,
        target_schema: impl Into<String>,
        rules: Vec<ReconciliationRule>,
        warnings: Vec<Warning>,
    ) -> Result<Self, serde_json::Error> {
        let fingerprint = compute_hash(&rules)?;
        Ok(Self {
            ruleset_id: format!("rs_{}", uuid::Uuid::new_v4().simple()),
            rules,
            source_schema: source_schema.into(),
            target_schema: target_schema.into(),
            created_at: Utc::now(),
            warnings,
            fingerprint,
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule(&self, rule_id: &str) -> Option<&ReconciliationRule> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({} -> {}, {} rules)",
            self.ruleset_id,
            self.source_schema,
            self.target_schema,
            self.rules.len()
        )?;
        for rule in &self.rules {
            writeln!(
                f,
                "  {}  {:.4}  {:<8} {:<13} {}",
                rule.rule_id,
                rule.confidence_score,
                rule.match_type.as_str(),
                rule.origin.as_str(),
                rule.rule_name
            )?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {}", warning)?;
        }
        Ok(())
    }
}
