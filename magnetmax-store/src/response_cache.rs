//! Response cache keyed by request fingerprint.
//!
//! Each fingerprint has at most one authoritative row and at most one
//! offline-fallback row. Writes update the matching row in place; reads
//! delete any surplus rows left behind by racing writers.
//!
//! The public lookup/store methods are best-effort: storage failures are
//! logged and reported as a miss (or as "not cached"), never as a call
//! failure.

use std::sync::Arc;

use magnetmax_core::{CacheOptions, CachedResponse, HttpRequest, HttpResponse};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, instrument, warn};

use crate::database::{Database, json_column};
use crate::error::StoreError;

const SELECT_COLUMNS: &str = "id, request_hash, http_method, url, is_offline_cache, response, \
     response_code, created_at, updated_at, expired_at";

// ============================================================================
// Entity
// ============================================================================

/// A persisted cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCacheEntity {
    /// Row id.
    pub id: i64,
    /// Request fingerprint (non-unique).
    pub request_hash: String,
    /// HTTP method of the cached request.
    pub http_method: String,
    /// URL of the cached request.
    pub url: String,
    /// True for the offline-fallback variant.
    pub is_offline_cache: bool,
    /// The cached response.
    pub response: CachedResponse,
    /// Status code of the cached response.
    pub response_code: u16,
    /// Insert time (epoch ms).
    pub created_at: i64,
    /// Last write time (epoch ms).
    pub updated_at: i64,
    /// End of the freshness window (epoch ms); 0 when there is none.
    pub expired_at: i64,
}

impl ResponseCacheEntity {
    /// Returns true if the entry is outside its freshness window at `now`.
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expired_at == 0 || now_millis > self.expired_at
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            request_hash: row.get(1)?,
            http_method: row.get(2)?,
            url: row.get(3)?,
            is_offline_cache: row.get(4)?,
            response: json_column(row, 5)?,
            response_code: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            expired_at: row.get(9)?,
        })
    }
}

// ============================================================================
// Store
// ============================================================================

/// Response cache over the shared database.
#[derive(Debug, Clone)]
pub struct ResponseCacheStore {
    db: Arc<Database>,
}

impl ResponseCacheStore {
    /// Creates a store over `db`.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Returns the cached response for `request` under `options`, if usable.
    ///
    /// A fresh entry is always usable. A stale entry is usable only when
    /// `options.always_use_cache_if_offline` is set and `offline` is true.
    #[instrument(skip(self, request, options), fields(url = %request.url))]
    pub fn get_cached_response(
        &self,
        request: &HttpRequest,
        options: &CacheOptions,
        offline: bool,
    ) -> Option<HttpResponse> {
        match self.lookup(&request.fingerprint(), options, offline) {
            Ok(Some(entity)) => {
                debug!(id = entity.id, offline_row = entity.is_offline_cache, "Cache hit");
                Some(entity.response.to_response(request))
            }
            Ok(None) => {
                debug!("Cache miss");
                None
            }
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Stores `response` for `request` and returns a response backed by the
    /// stored bytes.
    ///
    /// If the write fails the original response is returned unchanged.
    #[instrument(skip(self, request, response, options), fields(url = %request.url))]
    pub fn cache_response(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
        options: &CacheOptions,
    ) -> HttpResponse {
        match self.store(request, &response, options) {
            Ok(entity) => {
                let mut cached = entity.response.to_response(request);
                // Freshly fetched; the body is merely re-read from the cache.
                cached.source = response.source;
                cached
            }
            Err(e) => {
                warn!(error = %e, "Failed to cache response");
                response
            }
        }
    }

    /// Picks the row to serve for `request_hash` and deletes surplus rows.
    fn lookup(
        &self,
        request_hash: &str,
        options: &CacheOptions,
        offline: bool,
    ) -> Result<Option<ResponseCacheEntity>, StoreError> {
        let rows = self.entries_for(request_hash)?;

        let latest_online = rows.iter().find(|r| !r.is_offline_cache).cloned();
        let latest_offline = rows.iter().find(|r| r.is_offline_cache).cloned();

        let keep: Vec<i64> = [&latest_online, &latest_offline]
            .into_iter()
            .flatten()
            .map(|r| r.id)
            .collect();
        let surplus: Vec<i64> = rows
            .iter()
            .map(|r| r.id)
            .filter(|id| !keep.contains(id))
            .collect();
        if !surplus.is_empty() {
            debug!(request_hash, count = surplus.len(), "Deleting duplicate cache rows");
            self.delete_ids(&surplus)?;
        }

        let candidate = if options.always_use_cache_if_offline {
            latest_offline.or(latest_online)
        } else {
            latest_online.or(latest_offline)
        };
        let Some(entity) = candidate else {
            return Ok(None);
        };

        if !entity.is_expired_at(self.db.now_millis()) {
            return Ok(Some(entity));
        }
        if options.always_use_cache_if_offline && offline {
            debug!(id = entity.id, "Serving stale entry while offline");
            return Ok(Some(entity));
        }
        Ok(None)
    }

    /// Inserts or updates the row for this fingerprint and policy variant.
    fn store(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
        options: &CacheOptions,
    ) -> Result<ResponseCacheEntity, StoreError> {
        let request_hash = request.fingerprint();
        let is_offline_cache = options.always_use_cache_if_offline;
        let now = self.db.now_millis();
        let new_expiry = options.expires_at(now);
        let snapshot = CachedResponse::from(response);
        let snapshot_json = serde_json::to_string(&snapshot)?;

        self.db.with_conn(|conn| {
            let existing: Option<(i64, i64, i64)> = conn
                .query_row(
                    "SELECT id, created_at, expired_at FROM response_cache \
                     WHERE request_hash = ?1 AND is_offline_cache = ?2 \
                     ORDER BY updated_at DESC, id DESC LIMIT 1",
                    params![request_hash, is_offline_cache],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let entity = match existing {
                Some((id, created_at, old_expiry)) => {
                    let expired_at = old_expiry.max(new_expiry);
                    conn.execute(
                        "UPDATE response_cache SET http_method = ?1, url = ?2, response = ?3, \
                         response_code = ?4, updated_at = ?5, expired_at = ?6 WHERE id = ?7",
                        params![
                            request.method,
                            request.url,
                            snapshot_json,
                            response.status,
                            now,
                            expired_at,
                            id
                        ],
                    )?;
                    debug!(id, expired_at, "Updated cache row");
                    ResponseCacheEntity {
                        id,
                        request_hash,
                        http_method: request.method.clone(),
                        url: request.url.clone(),
                        is_offline_cache,
                        response: snapshot,
                        response_code: response.status,
                        created_at,
                        updated_at: now,
                        expired_at,
                    }
                }
                None => {
                    conn.execute(
                        "INSERT INTO response_cache (request_hash, http_method, url, \
                         is_offline_cache, response, response_code, created_at, updated_at, \
                         expired_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
                        params![
                            request_hash,
                            request.method,
                            request.url,
                            is_offline_cache,
                            snapshot_json,
                            response.status,
                            now,
                            new_expiry
                        ],
                    )?;
                    let id = conn.last_insert_rowid();
                    debug!(id, expired_at = new_expiry, "Inserted cache row");
                    ResponseCacheEntity {
                        id,
                        request_hash,
                        http_method: request.method.clone(),
                        url: request.url.clone(),
                        is_offline_cache,
                        response: snapshot,
                        response_code: response.status,
                        created_at: now,
                        updated_at: now,
                        expired_at: new_expiry,
                    }
                }
            };
            Ok(entity)
        })
    }

    /// Returns every row for a fingerprint, most recently updated first.
    pub fn entries_for(&self, request_hash: &str) -> Result<Vec<ResponseCacheEntity>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM response_cache WHERE request_hash = ?1 \
                 ORDER BY updated_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([request_hash], ResponseCacheEntity::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Deletes every cached response for `request`.
    pub fn remove(&self, request: &HttpRequest) -> Result<usize, StoreError> {
        let hash = request.fingerprint();
        self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM response_cache WHERE request_hash = ?1", [hash])?)
        })
    }

    /// Deletes every cached response.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let removed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM response_cache", [])?))?;
        debug!(removed, "Cleared response cache");
        Ok(removed)
    }

    /// Returns the number of cached rows.
    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
    }

    fn delete_ids(&self, ids: &[i64]) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM response_cache WHERE id = ?1")?;
                for id in ids {
                    stmt.execute([id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    #[cfg(test)]
    fn insert_raw(&self, entity: &ResponseCacheEntity) {
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO response_cache (request_hash, http_method, url, \
                     is_offline_cache, response, response_code, created_at, updated_at, \
                     expired_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        entity.request_hash,
                        entity.http_method,
                        entity.url,
                        entity.is_offline_cache,
                        serde_json::to_string(&entity.response)?,
                        entity.response_code,
                        entity.created_at,
                        entity.updated_at,
                        entity.expired_at
                    ],
                )?;
                Ok(())
            })
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magnetmax_core::ManualClock;
    use std::time::Duration;

    fn setup() -> (ResponseCacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let db = Arc::new(Database::open_in_memory(clock.clone()).unwrap());
        (ResponseCacheStore::new(db), clock)
    }

    fn request() -> HttpRequest {
        HttpRequest::get("https://api.example.com/api/users?page=1")
    }

    fn ok(body: &str) -> HttpResponse {
        HttpResponse::new(200, body.as_bytes().to_vec())
    }

    #[test]
    fn test_roundtrip_then_expiry() {
        let (store, clock) = setup();
        let options = CacheOptions::builder().max_cache_age(60).build();

        let stored = store.cache_response(&request(), ok("v1"), &options);
        assert_eq!(stored.body, b"v1");

        let hit = store.get_cached_response(&request(), &options, false).unwrap();
        assert_eq!(hit.body, b"v1");
        assert_eq!(hit.status, 200);
        assert!(hit.is_from_cache());

        clock.advance(Duration::from_secs(61));
        assert!(store.get_cached_response(&request(), &options, false).is_none());
    }

    #[test]
    fn test_stale_served_only_while_offline() {
        let (store, clock) = setup();
        let options = CacheOptions::builder()
            .max_cache_age(10)
            .always_use_cache_if_offline(true)
            .build();

        store.cache_response(&request(), ok("offline"), &options);
        clock.advance(Duration::from_secs(30));

        let offline = store.get_cached_response(&request(), &options, true);
        assert_eq!(offline.unwrap().body, b"offline");
        assert!(store.get_cached_response(&request(), &options, false).is_none());
    }

    #[test]
    fn test_second_write_updates_same_row() {
        let (store, clock) = setup();
        let long = CacheOptions::builder().max_cache_age(600).build();
        let short = CacheOptions::builder().max_cache_age(10).build();

        store.cache_response(&request(), ok("first"), &long);
        clock.advance(Duration::from_secs(5));
        store.cache_response(&request(), ok("second"), &short);

        let rows = store.entries_for(&request().fingerprint()).unwrap();
        let online: Vec<_> = rows.iter().filter(|r| !r.is_offline_cache).collect();
        assert_eq!(online.len(), 1);

        let row = online[0];
        assert_eq!(row.updated_at, 1_005_000);
        assert_eq!(row.created_at, 1_000_000);
        // max(1_000_000 + 600s, 1_005_000 + 10s)
        assert_eq!(row.expired_at, 1_600_000);
        assert_eq!(row.response.body, b"second");
    }

    #[test]
    fn test_offline_and_online_rows_coexist() {
        let (store, _clock) = setup();
        let online = CacheOptions::builder().max_cache_age(60).build();
        let offline = CacheOptions::builder().always_use_cache_if_offline(true).build();

        store.cache_response(&request(), ok("a"), &online);
        store.cache_response(&request(), ok("b"), &offline);

        let rows = store.entries_for(&request().fingerprint()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|r| r.is_offline_cache).count(), 1);
    }

    #[test]
    fn test_lookup_deletes_duplicate_rows() {
        let (store, _clock) = setup();
        let hash = request().fingerprint();
        let template = ResponseCacheEntity {
            id: 0,
            request_hash: hash.clone(),
            http_method: "GET".into(),
            url: request().url,
            is_offline_cache: false,
            response: CachedResponse::from(&ok("dup")),
            response_code: 200,
            created_at: 1_000_000,
            updated_at: 1_000_000,
            expired_at: 2_000_000,
        };
        for i in 0..3 {
            store.insert_raw(&ResponseCacheEntity {
                updated_at: 1_000_000 + i,
                ..template.clone()
            });
        }
        store.insert_raw(&ResponseCacheEntity {
            is_offline_cache: true,
            ..template.clone()
        });

        let options = CacheOptions::builder().max_cache_age(60).build();
        assert!(store.get_cached_response(&request(), &options, false).is_some());

        let rows = store.entries_for(&hash).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].updated_at, 1_000_002);
        assert!(rows.iter().any(|r| r.is_offline_cache));
    }

    #[test]
    fn test_zero_age_without_offline_is_never_fresh() {
        let (store, _clock) = setup();
        let options = CacheOptions::builder().always_use_cache_if_offline(true).build();
        store.cache_response(&request(), ok("x"), &options);

        // Online: no freshness window, so no hit.
        assert!(store.get_cached_response(&request(), &options, false).is_none());
        assert!(store.get_cached_response(&request(), &options, true).is_some());
    }

    #[test]
    fn test_clear_and_remove() {
        let (store, _clock) = setup();
        let options = CacheOptions::builder().max_cache_age(60).build();
        store.cache_response(&request(), ok("x"), &options);
        store.cache_response(&HttpRequest::get("https://api.example.com/api/other"), ok("y"), &options);

        assert_eq!(store.remove(&request()).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }
}
