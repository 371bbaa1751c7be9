//! Persisted state: the append-only event log and projection snapshots.
//!
//! One `SQLite` file holds two tables:
//!
//! ```text
//! events       # append-only: seq, kind, payload, timestamp
//! projections  # key/value: name, version, value, last_event
//! ```
//!
//! Append is the only mutation of the event log; `clear_events` is the
//! only deletion. The store may be opened by cooperating processes, so
//! busy/locked failures are retried with exponential backoff before they
//! surface. An incompatible schema version reinitializes the store
//! rather than misreading old rows.

use std::path::PathBuf;
use std::time::Duration;
use std::{fs, io, thread};

use rusqlite::Connection;
use tracing::{error, warn};

mod events;
mod projections;

/// Bumped on incompatible table changes; a mismatch drops and recreates
/// both tables.
const SCHEMA_VERSION: u32 = 1;

/// How many times a busy store is retried before the failure surfaces.
const MAX_ATTEMPTS: u32 = 5;

/// First backoff delay; doubles per attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("store still busy after {attempts} attempts: {source}")]
    Busy {
        attempts: u32,
        source: rusqlite::Error,
    },
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// SQLite-backed storage for events and projections.
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    /// Opens (or creates) the store at the given file path.
    ///
    /// Creates the parent directory if needed and reinitializes the
    /// tables when the persisted schema version doesn't match.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let storage = Self { path };
        let conn = storage.open_db()?;
        init_schema(&conn)?;
        Ok(storage)
    }

    /// Returns the default store path: `~/.wingman/state.sqlite`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".wingman").join("state.sqlite"))
    }

    /// The store's file path.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn open_db(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    /// Runs `op` on a fresh connection, retrying busy/locked failures
    /// with exponential backoff.
    ///
    /// Exhausted retries surface as [`StorageError::Busy`] and are
    /// logged at error severity — the caller's in-memory state is still
    /// correct, but that write was not made durable.
    fn with_retry<T>(&self, mut op: impl FnMut(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            let conn = self.open_db()?;
            match op(&conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) => {
                    if attempt >= MAX_ATTEMPTS {
                        error!(
                            attempts = attempt,
                            path = %self.path.display(),
                            error = %e,
                            "store still busy after exhausting retries"
                        );
                        return Err(StorageError::Busy {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    warn!(attempt, ?delay, "store busy; backing off");
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// True for the transient lock-contention failures worth retrying.
fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Creates the tables, reinitializing when the schema version moved.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let stored: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
            row.get(0)
        })
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    if let Some(stored) = stored
        && stored != SCHEMA_VERSION.to_string()
    {
        warn!(
            stored = %stored,
            current = SCHEMA_VERSION,
            "incompatible store schema; reinitializing"
        );
        conn.execute("DROP TABLE IF EXISTS events", [])?;
        conn.execute("DROP TABLE IF EXISTS projections", [])?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
             seq INTEGER PRIMARY KEY AUTOINCREMENT,
             kind TEXT NOT NULL,
             payload TEXT NOT NULL,
             timestamp TEXT NOT NULL
         )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS projections (
             name TEXT PRIMARY KEY,
             version INTEGER NOT NULL,
             value TEXT NOT NULL,
             last_event INTEGER
         )",
        [],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}
