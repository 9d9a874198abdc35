//! Ruleset persistence.
//!
//! Rulesets are immutable: `save` refuses an id that already exists, and
//! regenerating rules always yields a fresh `ruleset_id`.
//!
//! - [`SqliteRulesetStore`]: versioned SQLite database, default
//!   `~/.reconciler/rulesets.db`
//! - [`FileRulesetStore`]: one `<ruleset_id>.json` document per ruleset
//! - [`MemoryRulesetStore`]: process-local, for tests and one-shot runs

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::model::RuleSet;

/// Current store schema version. Bump when the table layout changes.
const STORE_VERSION: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ruleset not found: {0}")]
    NotFound(String),

    #[error("ruleset already exists: {0}")]
    AlreadyExists(String),

    #[error("store schema version {found} is not supported (expected {expected})")]
    VersionMismatch { found: i32, expected: i32 },

    #[error("invalid ruleset id: {0}")]
    InvalidId(String),

    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Listing entry; enough to pick a ruleset without loading it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesetSummary {
    pub ruleset_id: String,
    pub source_schema: String,
    pub target_schema: String,
    pub rule_count: usize,
    pub created_at: DateTime<Utc>,
    pub fingerprint: String,
}

impl From<&RuleSet> for RulesetSummary {
    fn from(rs: &RuleSet) -> Self {
        Self {
            ruleset_id: rs.ruleset_id.clone(),
            source_schema: rs.source_schema.clone(),
            target_schema: rs.target_schema.clone(),
            rule_count: rs.rules.len(),
            created_at: rs.created_at,
            fingerprint: rs.fingerprint.clone(),
        }
    }
}

pub trait RulesetStore: Send + Sync {
    /// Persist a ruleset, returning its id.
    fn save(&self, ruleset: &RuleSet) -> StoreResult<String>;

    fn load(&self, ruleset_id: &str) -> StoreResult<RuleSet>;

    /// All stored rulesets, newest first.
    fn list(&self) -> StoreResult<Vec<RulesetSummary>>;
}

/// SQLite-backed ruleset store.
pub struct SqliteRulesetStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteRulesetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRulesetStore").finish_non_exhaustive()
    }
}

impl SqliteRulesetStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS rulesets (
                ruleset_id TEXT PRIMARY KEY,
                source_schema TEXT NOT NULL,
                target_schema TEXT NOT NULL,
                rule_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| row.get(0))
            .optional()?;

        match stored {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('version', ?1)",
                    params![STORE_VERSION.to_string()],
                )?;
            }
            Some(v) => {
                let found = v.parse().unwrap_or(0);
                if found != STORE_VERSION {
                    // Rulesets are audit material; never drop them on a version change.
                    return Err(StoreError::VersionMismatch {
                        found,
                        expected: STORE_VERSION,
                    });
                }
            }
        }
        Ok(())
    }
}

impl RulesetStore for SqliteRulesetStore {
    fn save(&self, ruleset: &RuleSet) -> StoreResult<String> {
        let body = serde_json::to_string(ruleset)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO rulesets
                (ruleset_id, source_schema, target_schema, rule_count, created_at, fingerprint, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ruleset.ruleset_id,
                ruleset.source_schema,
                ruleset.target_schema,
                ruleset.rules.len() as i64,
                ruleset.created_at.to_rfc3339(),
                ruleset.fingerprint,
                body
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists(ruleset.ruleset_id.clone()));
        }
        tracing::debug!(ruleset_id = %ruleset.ruleset_id, rules = ruleset.rules.len(), "saved ruleset");
        Ok(ruleset.ruleset_id.clone())
    }

    fn load(&self, ruleset_id: &str) -> StoreResult<RuleSet> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM rulesets WHERE ruleset_id = ?1",
                params![ruleset_id],
                |row| row.get(0),
            )
            .optional()?;
        let body = body.ok_or_else(|| StoreError::NotFound(ruleset_id.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }

    fn list(&self) -> StoreResult<Vec<RulesetSummary>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT ruleset_id, source_schema, target_schema, rule_count, created_at, fingerprint
             FROM rulesets ORDER BY created_at DESC, ruleset_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(ruleset_id, source_schema, target_schema, count, created, fingerprint)| {
                RulesetSummary {
                    ruleset_id,
                    source_schema,
                    target_schema,
                    rule_count: count.max(0) as usize,
                    created_at: DateTime::parse_from_rfc3339(&created)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_default(),
                    fingerprint,
                }
            })
            .collect())
    }
}

/// Directory of JSON documents, one per ruleset.
#[derive(Debug, Clone)]
pub struct FileRulesetStore {
    dir: PathBuf,
}

impl FileRulesetStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, ruleset_id: &str) -> StoreResult<PathBuf> {
        let valid = !ruleset_id.is_empty()
            && ruleset_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidId(ruleset_id.to_string()));
        }
        Ok(self.dir.join(format!("{ruleset_id}.json")))
    }
}

impl RulesetStore for FileRulesetStore {
    fn save(&self, ruleset: &RuleSet) -> StoreResult<String> {
        let path = self.path_for(&ruleset.ruleset_id)?;
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    StoreError::AlreadyExists(ruleset.ruleset_id.clone())
                }
                _ => StoreError::Io(e),
            })?;
        serde_json::to_writer_pretty(file, ruleset)?;
        Ok(ruleset.ruleset_id.clone())
    }

    fn load(&self, ruleset_id: &str) -> StoreResult<RuleSet> {
        let path = self.path_for(ruleset_id)?;
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(ruleset_id.to_string()),
            _ => StoreError::Io(e),
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn list(&self) -> StoreResult<Vec<RulesetSummary>> {
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<RuleSet>(&content) {
                Ok(rs) => summaries.push(RulesetSummary::from(&rs)),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable ruleset file"),
            }
        }
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryRulesetStore {
    rulesets: DashMap<String, RuleSet>,
}

impl MemoryRulesetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RulesetStore for MemoryRulesetStore {
    fn save(&self, ruleset: &RuleSet) -> StoreResult<String> {
        match self.rulesets.entry(ruleset.ruleset_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::AlreadyExists(ruleset.ruleset_id.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ruleset.clone());
                Ok(ruleset.ruleset_id.clone())
            }
        }
    }

    fn load(&self, ruleset_id: &str) -> StoreResult<RuleSet> {
        self.rulesets
            .get(ruleset_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(ruleset_id.to_string()))
    }

    fn list(&self) -> StoreResult<Vec<RulesetSummary>> {
        let mut summaries: Vec<RulesetSummary> = self
            .rulesets
            .iter()
            .map(|r| RulesetSummary::from(r.value()))
            .collect();
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}

fn sort_newest_first(summaries: &mut [RulesetSummary]) {
    summaries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.ruleset_id.cmp(&b.ruleset_id))
    });
}
