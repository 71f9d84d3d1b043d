//! The on-device SQLite database shared by the response cache and the
//! reliable-request queue.
//!
//! Access is single-process: one connection behind a mutex. Read-modify-write
//! sequences in the stores are not wrapped in upserts, so concurrent writers
//! on the same fingerprint can briefly produce duplicate rows; the stores
//! clean those up on the next read.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use magnetmax_core::{Clock, SystemClock};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::persistence::ensure_dir_sync;

/// Current schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS response_cache (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    request_hash     TEXT    NOT NULL,
    http_method      TEXT    NOT NULL,
    url              TEXT    NOT NULL,
    is_offline_cache INTEGER NOT NULL DEFAULT 0,
    response         TEXT    NOT NULL,
    response_code    INTEGER NOT NULL,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL,
    expired_at       INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_response_cache_hash ON response_cache (request_hash);

CREATE TABLE IF NOT EXISTS reliable_request (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    request_hash        TEXT    NOT NULL,
    http_method         TEXT    NOT NULL,
    url                 TEXT    NOT NULL,
    request             TEXT    NOT NULL,
    options             TEXT    NOT NULL,
    wifi_preq           INTEGER NOT NULL DEFAULT 0,
    retries             INTEGER NOT NULL DEFAULT 0,
    last_failure_time   INTEGER,
    last_failure_reason TEXT,
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL,
    expired_at          INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_reliable_request_hash ON reliable_request (request_hash);
";

/// Handle to the on-device database.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl Database {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Opens the database at `path` with a custom clock.
    pub fn open_with_clock(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir_sync(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        info!(path = %path.display(), "Opened database");
        Self::init(conn, clock)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            debug!(from = version, to = SCHEMA_VERSION, "Migrating schema");
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    /// Returns the clock used for row timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time in epoch milliseconds according to the database clock.
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Runs `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }
}

/// Reads a JSON-encoded TEXT column.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use magnetmax_core::ManualClock;

    fn table_names(db: &Database) -> Vec<String> {
        db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .unwrap()
    }

    #[test]
    fn test_schema_created() {
        let db = Database::open_in_memory(Arc::new(ManualClock::new(0))).unwrap();
        let names = table_names(&db);
        assert!(names.contains(&"response_cache".to_string()));
        assert!(names.contains(&"reliable_request".to_string()));
    }

    #[test]
    fn test_reopen_file_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("magnetmax.db");

        drop(Database::open(&path).unwrap());
        let db = Database::open(&path).unwrap();

        assert!(path.exists());
        assert!(table_names(&db).contains(&"reliable_request".to_string()));
    }

    #[test]
    fn test_clock_is_shared() {
        let clock = Arc::new(ManualClock::new(42));
        let db = Database::open_in_memory(clock.clone()).unwrap();
        clock.advance(Duration::from_millis(8));
        assert_eq!(db.now_millis(), 50);
    }
}
