//! Staging table lifecycle.
//!
//! ```text
//! CREATED ─► LOADED ─► INDEXED ─► QUERIED ─► RETAINED ─► EXPIRED
//!    │          │          │                    ▲           ▲
//!    └──────────┴──────────┴────────────────────┘           │
//!                        (any non-expired state) ───────────┘
//! ```
//!
//! A run that stops early (failure, cancellation) moves its tables straight
//! to `RETAINED` so they wait out the retention window like any other.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingState {
    Created,
    Loaded,
    Indexed,
    Queried,
    Retained,
    Expired,
}

impl StagingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingState::Created => "created",
            StagingState::Loaded => "loaded",
            StagingState::Indexed => "indexed",
            StagingState::Queried => "queried",
            StagingState::Retained => "retained",
            StagingState::Expired => "expired",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: StagingState) -> bool {
        use StagingState::*;
        match (self, next) {
            (Expired, _) => false,
            (_, Expired) => true,
            (Retained, Retained) => false,
            (_, Retained) => true,
            (Created, Loaded) | (Loaded, Indexed) | (Indexed, Queried) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StagingState::Expired)
    }
}

impl fmt::Display for StagingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StagingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(StagingState::Created),
            "loaded" => Ok(StagingState::Loaded),
            "indexed" => Ok(StagingState::Indexed),
            "queried" => Ok(StagingState::Queried),
            "retained" => Ok(StagingState::Retained),
            "expired" => Ok(StagingState::Expired),
            other => Err(format!("unknown staging state '{other}'")),
        }
    }
}
