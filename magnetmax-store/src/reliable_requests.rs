//! Persistent queue of reliable ("fire eventually") requests.
//!
//! One row per fingerprint. Repeated failures bump `retries` on that row
//! instead of inserting a new one, and the row's expiry only ever moves
//! later. Expired rows are dropped lazily whenever the full list is read.

use std::sync::Arc;

use magnetmax_core::{CachedRequest, HttpRequest, ReliableCallOptions};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, info, instrument};

use crate::database::{Database, json_column};
use crate::error::StoreError;

const SELECT_COLUMNS: &str = "id, request_hash, http_method, url, request, options, wifi_preq, \
     retries, last_failure_time, last_failure_reason, created_at, updated_at, expired_at";

// ============================================================================
// Entity
// ============================================================================

/// A persisted reliable request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliableRequestEntity {
    /// Row id.
    pub id: i64,
    /// Request fingerprint.
    pub request_hash: String,
    /// HTTP method.
    pub http_method: String,
    /// Request URL.
    pub url: String,
    /// Snapshot of the request to replay.
    pub request: CachedRequest,
    /// Reliability policy the call was issued with.
    pub options: ReliableCallOptions,
    /// True if the call waits for Wi-Fi.
    pub wifi_preq: bool,
    /// Number of failed attempts after the first.
    pub retries: u32,
    /// Time of the last failure (epoch ms).
    pub last_failure_time: Option<i64>,
    /// Reason of the last failure.
    pub last_failure_reason: Option<String>,
    /// Insert time (epoch ms).
    pub created_at: i64,
    /// Last write time (epoch ms).
    pub updated_at: i64,
    /// Absolute expiry (epoch ms); 0 when the call never expires.
    pub expired_at: i64,
}

impl ReliableRequestEntity {
    /// Returns true if the row outlived its expiry at `now`.
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expired_at != 0 && self.expired_at < now_millis
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            request_hash: row.get(1)?,
            http_method: row.get(2)?,
            url: row.get(3)?,
            request: json_column(row, 4)?,
            options: json_column(row, 5)?,
            wifi_preq: row.get(6)?,
            retries: row.get(7)?,
            last_failure_time: row.get(8)?,
            last_failure_reason: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            expired_at: row.get(12)?,
        })
    }
}

/// Later of two expiries where 0 stands for "never".
fn extend_expiry(current: i64, candidate: i64) -> i64 {
    if current == 0 || candidate == 0 {
        0
    } else {
        current.max(candidate)
    }
}

// ============================================================================
// Store
// ============================================================================

/// Reliable-request queue over the shared database.
#[derive(Debug, Clone)]
pub struct ReliableRequestStore {
    db: Arc<Database>,
}

impl ReliableRequestStore {
    /// Creates a store over `db`.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upserts the row for `request`.
    ///
    /// A new row starts at `retries = 0`. An existing row gets `retries += 1`,
    /// fresh failure metadata, the latest request/options, and an expiry that
    /// only moves later.
    #[instrument(skip(self, request, options), fields(url = %request.url))]
    pub fn save_request(
        &self,
        request: &HttpRequest,
        options: &ReliableCallOptions,
        failure_reason: Option<&str>,
    ) -> Result<ReliableRequestEntity, StoreError> {
        let request_hash = request.fingerprint();
        let snapshot = CachedRequest::from(request);
        let request_json = serde_json::to_string(&snapshot)?;
        let options_json = serde_json::to_string(options)?;
        let wifi_preq = options.requires_wifi();
        let now = self.db.now_millis();
        let new_expiry = options.expires_at();
        let failure_time = failure_reason.map(|_| now);

        let id = self.db.with_conn(|conn| {
            let existing: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT id, expired_at FROM reliable_request WHERE request_hash = ?1 \
                     ORDER BY updated_at DESC, id DESC LIMIT 1",
                    [&request_hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                Some((id, old_expiry)) => {
                    conn.execute(
                        "UPDATE reliable_request SET http_method = ?1, url = ?2, request = ?3, \
                         options = ?4, wifi_preq = ?5, retries = retries + 1, \
                         last_failure_time = ?6, last_failure_reason = ?7, updated_at = ?8, \
                         expired_at = ?9 WHERE id = ?10",
                        params![
                            request.method,
                            request.url,
                            request_json,
                            options_json,
                            wifi_preq,
                            failure_time,
                            failure_reason,
                            now,
                            extend_expiry(old_expiry, new_expiry),
                            id
                        ],
                    )?;
                    debug!(id, "Incremented retries on reliable request");
                    Ok(id)
                }
                None => {
                    conn.execute(
                        "INSERT INTO reliable_request (request_hash, http_method, url, request, \
                         options, wifi_preq, retries, last_failure_time, last_failure_reason, \
                         created_at, updated_at, expired_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?9, ?10)",
                        params![
                            request_hash,
                            request.method,
                            request.url,
                            request_json,
                            options_json,
                            wifi_preq,
                            failure_time,
                            failure_reason,
                            now,
                            new_expiry
                        ],
                    )?;
                    let id = conn.last_insert_rowid();
                    debug!(id, "Inserted reliable request");
                    Ok(id)
                }
            }
        })?;

        self.find_by_id(id)?
            .ok_or_else(|| StoreError::NotFound(format!("reliable request {id}")))
    }

    /// Deletes the row(s) for `request`.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub fn remove_request(&self, request: &HttpRequest) -> Result<usize, StoreError> {
        self.remove_by_hash(&request.fingerprint())
    }

    /// Deletes the row(s) for a fingerprint.
    pub fn remove_by_hash(&self, request_hash: &str) -> Result<usize, StoreError> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM reliable_request WHERE request_hash = ?1",
                [request_hash],
            )?)
        })?;
        if removed > 0 {
            debug!(request_hash, removed, "Removed reliable request");
        }
        Ok(removed)
    }

    /// Returns all live rows, most recently updated first.
    ///
    /// Rows whose expiry has passed are deleted and left out of the result.
    pub fn get_all_cached_request_entities(
        &self,
    ) -> Result<Vec<ReliableRequestEntity>, StoreError> {
        let now = self.db.now_millis();
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM reliable_request ORDER BY updated_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([], ReliableRequestEntity::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let (expired, live): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|r| r.is_expired_at(now));

        if !expired.is_empty() {
            self.db.with_conn(|conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare("DELETE FROM reliable_request WHERE id = ?1")?;
                    for row in &expired {
                        stmt.execute([row.id])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })?;
            info!(count = expired.len(), "Pruned expired reliable requests");
        }

        Ok(live)
    }

    /// Returns the row for a fingerprint, if any.
    pub fn find(&self, request_hash: &str) -> Result<Option<ReliableRequestEntity>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM reliable_request WHERE request_hash = ?1 \
                         ORDER BY updated_at DESC, id DESC LIMIT 1"
                    ),
                    [request_hash],
                    ReliableRequestEntity::from_row,
                )
                .optional()?)
        })
    }

    fn find_by_id(&self, id: i64) -> Result<Option<ReliableRequestEntity>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM reliable_request WHERE id = ?1"),
                    [id],
                    ReliableRequestEntity::from_row,
                )
                .optional()?)
        })
    }

    /// Deletes every row.
    pub fn clear_pending_calls(&self) -> Result<usize, StoreError> {
        let removed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM reliable_request", [])?))?;
        info!(removed, "Cleared pending reliable requests");
        Ok(removed)
    }

    /// Returns the number of rows, expired ones included.
    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM reliable_request", [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magnetmax_core::ManualClock;
    use std::time::Duration;

    fn setup() -> (ReliableRequestStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let db = Arc::new(Database::open_in_memory(clock.clone()).unwrap());
        (ReliableRequestStore::new(db), clock)
    }

    fn request() -> HttpRequest {
        HttpRequest::post("https://api.example.com/api/events").with_body(br#"{"e":1}"#.to_vec())
    }

    fn options(created_at: i64, expires_in: u64) -> ReliableCallOptions {
        ReliableCallOptions::builder()
            .expires_in(expires_in)
            .created_at(created_at)
            .wifi_only()
            .build()
    }

    #[test]
    fn test_second_save_increments_retries() {
        let (store, clock) = setup();

        let first = store.save_request(&request(), &options(10_000, 60), Some("no wifi")).unwrap();
        assert_eq!(first.retries, 0);
        assert!(first.wifi_preq);
        assert_eq!(first.last_failure_reason.as_deref(), Some("no wifi"));

        clock.advance(Duration::from_secs(1));
        let second = store
            .save_request(&request(), &options(10_000, 60), Some("connection refused"))
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.retries, 1);
        assert_eq!(second.last_failure_reason.as_deref(), Some("connection refused"));
        assert_eq!(second.last_failure_time, Some(11_000));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_expiry_only_extends() {
        let (store, _clock) = setup();

        let long = store.save_request(&request(), &options(10_000, 600), None).unwrap();
        assert_eq!(long.expired_at, 610_000);

        let short = store.save_request(&request(), &options(10_000, 60), None).unwrap();
        assert_eq!(short.expired_at, 610_000);

        let longer = store.save_request(&request(), &options(20_000, 600), None).unwrap();
        assert_eq!(longer.expired_at, 620_000);
    }

    #[test]
    fn test_never_expiring_stays_never() {
        assert_eq!(extend_expiry(0, 5), 0);
        assert_eq!(extend_expiry(5, 0), 0);
        assert_eq!(extend_expiry(5, 7), 7);
    }

    #[test]
    fn test_expired_rows_pruned_on_read() {
        let (store, clock) = setup();
        store.save_request(&request(), &options(10_000, 5), None).unwrap();
        let other = HttpRequest::get("https://api.example.com/api/ping");
        store.save_request(&other, &options(10_000, 3600), None).unwrap();

        clock.advance(Duration::from_secs(6));
        let live = store.get_all_cached_request_entities().unwrap();

        assert_eq!(live.len(), 1);
        assert_eq!(live[0].url, other.url);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.find(&request().fingerprint()).unwrap().is_none());
    }

    #[test]
    fn test_list_ordered_by_most_recent_update() {
        let (store, clock) = setup();
        let a = HttpRequest::get("https://api.example.com/api/a");
        let b = HttpRequest::get("https://api.example.com/api/b");

        store.save_request(&a, &options(10_000, 0), None).unwrap();
        clock.advance(Duration::from_millis(5));
        store.save_request(&b, &options(10_000, 0), None).unwrap();
        clock.advance(Duration::from_millis(5));
        store.save_request(&a, &options(10_000, 0), None).unwrap();

        let urls: Vec<_> = store
            .get_all_cached_request_entities()
            .unwrap()
            .into_iter()
            .map(|r| r.url)
            .collect();
        assert_eq!(urls, vec![a.url, b.url]);
    }

    #[test]
    fn test_remove_and_clear() {
        let (store, _clock) = setup();
        store.save_request(&request(), &options(10_000, 60), None).unwrap();
        store
            .save_request(&HttpRequest::get("https://api.example.com/api/x"), &options(10_000, 60), None)
            .unwrap();

        assert_eq!(store.remove_request(&request()).unwrap(), 1);
        assert_eq!(store.remove_request(&request()).unwrap(), 0);
        assert_eq!(store.clear_pending_calls().unwrap(), 1);
        assert!(store.get_all_cached_request_entities().unwrap().is_empty());
    }

    #[test]
    fn test_persisted_request_replays_identically() {
        let (store, _clock) = setup();
        let original = request().with_header("Content-Type", "application/json");
        let row = store.save_request(&original, &options(10_000, 60), None).unwrap();

        let replay = row.request.to_request();
        assert_eq!(replay.fingerprint(), original.fingerprint());
        assert_eq!(replay.header("content-type"), Some("application/json"));
        assert!(row.options.requires_wifi());
    }
}
