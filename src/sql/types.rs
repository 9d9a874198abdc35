//! Column types for staging DDL and type-compatibility checks.
//!
//! Source schemas report free-form type strings (`character varying(64)`,
//! `NVARCHAR(MAX)`, `numeric(18,2)`). [`ColumnType::parse`] maps them onto a
//! small set of portable types that every dialect can emit for staging
//! tables. Unknown types become [`ColumnType::Text`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PARAMETERIZED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([a-z][a-z0-9 _]*?)\s*\(\s*(max|\d+)\s*(?:,\s*(\d+)\s*)?\)\s*$").unwrap()
});

/// Portable column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Int32,
    Int64,
    Float64,
    /// Fixed-precision decimal (precision, scale).
    Decimal(u8, u8),
    /// Bounded string.
    Varchar(u16),
    /// Unbounded string.
    Text,
    Date,
    Timestamp,
}

/// Broad type family used to decide whether two columns can be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    Boolean,
    Numeric,
    Text,
    Temporal,
}

impl ColumnType {
    /// Parse a database type name. Never fails: unrecognised names map to `Text`.
    ///
    /// ```ignore
    /// assert_eq!(ColumnType::parse("numeric(18,2)"), ColumnType::Decimal(18, 2));
    /// assert_eq!(ColumnType::parse("NVARCHAR(MAX)"), ColumnType::Text);
    /// ```
    pub fn parse(s: &str) -> Self {
        let s = s.trim().to_lowercase();

        if let Some(caps) = PARAMETERIZED.captures(&s) {
            let base = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let first = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let second = caps.get(3).map(|m| m.as_str());
            return Self::parse_parameterized(base, first, second);
        }

        match s.as_str() {
            "bool" | "boolean" | "bit" => ColumnType::Bool,
            "tinyint" | "smallint" | "int" | "integer" | "int2" | "int4" | "mediumint"
            | "serial" => ColumnType::Int32,
            "bigint" | "int8" | "bigserial" | "long" => ColumnType::Int64,
            "real" | "float" | "float4" | "float8" | "double" | "double precision" => {
                ColumnType::Float64
            }
            "decimal" | "numeric" | "number" | "money" => ColumnType::Decimal(18, 2),
            "date" => ColumnType::Date,
            "timestamp" | "datetime" | "datetime2" | "timestamptz" | "smalldatetime"
            | "timestamp with time zone" | "timestamp without time zone" | "datetimeoffset" => {
                ColumnType::Timestamp
            }
            _ => ColumnType::Text,
        }
    }

    fn parse_parameterized(base: &str, first: &str, second: Option<&str>) -> Self {
        match base {
            "decimal" | "numeric" | "number" => {
                let precision = first.parse::<u8>().unwrap_or(18).clamp(1, 38);
                let scale = second
                    .and_then(|s| s.parse::<u8>().ok())
                    .unwrap_or(0)
                    .min(precision);
                ColumnType::Decimal(precision, scale)
            }
            "varchar" | "nvarchar" | "character varying" | "char" | "nchar" | "character"
            | "varchar2" | "nvarchar2" => match first.parse::<u16>() {
                Ok(n) if n > 0 => ColumnType::Varchar(n),
                _ => ColumnType::Text,
            },
            "float" | "double" => ColumnType::Float64,
            "tinyint" | "smallint" | "int" | "integer" | "mediumint" => ColumnType::Int32,
            "bigint" => ColumnType::Int64,
            "bit" if first == "1" => ColumnType::Bool,
            "datetime2" | "timestamp" | "datetimeoffset" => ColumnType::Timestamp,
            _ => ColumnType::Text,
        }
    }

    /// Whether this is an unbounded text type (cannot be indexed on some dialects).
    pub fn is_unbounded_text(&self) -> bool {
        matches!(self, ColumnType::Text)
    }

    pub fn family(&self) -> TypeFamily {
        match self {
            ColumnType::Bool => TypeFamily::Boolean,
            ColumnType::Int32 | ColumnType::Int64 | ColumnType::Float64 | ColumnType::Decimal(..) => {
                TypeFamily::Numeric
            }
            ColumnType::Varchar(_) | ColumnType::Text => TypeFamily::Text,
            ColumnType::Date | ColumnType::Timestamp => TypeFamily::Temporal,
        }
    }

    /// Whether values of the two types can be compared for a match.
    ///
    /// Text is compatible with everything since keys are often stored as strings.
    pub fn is_compatible_with(&self, other: &ColumnType) -> bool {
        let (a, b) = (self.family(), other.family());
        a == b || a == TypeFamily::Text || b == TypeFamily::Text
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Bool => write!(f, "BOOLEAN"),
            ColumnType::Int32 => write!(f, "INTEGER"),
            ColumnType::Int64 => write!(f, "BIGINT"),
            ColumnType::Float64 => write!(f, "DOUBLE"),
            ColumnType::Decimal(p, s) => write!(f, "DECIMAL({}, {})", p, s),
            ColumnType::Varchar(n) => write!(f, "VARCHAR({})", n),
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::Date => write!(f, "DATE"),
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}
