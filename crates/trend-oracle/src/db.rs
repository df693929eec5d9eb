//! SQLite handle shared by the candidate store, claim ledger and replica
//! registry.
//!
//! Each collection lives in its own table and can be loaded independently.
//! Writes commit immediately, so a crash between phases never loses a
//! recorded deployment.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::OracleError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS deployed_topics (
    normalized_key TEXT PRIMARY KEY,
    artifact_id TEXT NOT NULL,
    external_reference TEXT NOT NULL,
    transaction_id TEXT,
    ticker TEXT NOT NULL,
    name TEXT NOT NULL,
    deployed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_claims (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_reference TEXT NOT NULL,
    auth_key_material TEXT,
    display_name TEXT NOT NULL,
    registered_at INTEGER NOT NULL,
    eligible_at INTEGER NOT NULL,
    claimed INTEGER NOT NULL DEFAULT 0,
    claimed_at INTEGER,
    result TEXT
);

CREATE INDEX IF NOT EXISTS idx_pending_claims_claimed ON pending_claims(claimed);

CREATE TABLE IF NOT EXISTS replicas (
    sequence_number INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    instance_id TEXT NOT NULL,
    profile_handle TEXT,
    created_at INTEGER NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS provisioning_steps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    sequence_number INTEGER NOT NULL,
    step TEXT NOT NULL,
    outcome TEXT NOT NULL,
    detail TEXT,
    recorded_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_provisioning_steps_run ON provisioning_steps(run_id);
"#;

/// SQLite database wrapper.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OracleError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// In-memory database, used by tests and dry runs without a data dir.
    pub fn open_in_memory() -> Result<Self, OracleError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, OracleError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, OracleError> {
        self.conn.lock().map_err(|_| OracleError::LockPoisoned)
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
