//! Response cache storage trait and SQLite implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::CacheKey;
use crate::api::http::Response;

/// A stored response together with where and when it was stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// Name of the cache (generation) holding the entry
  pub cache_name: String,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for response cache backends.
///
/// Entries live in named caches; a cache is created implicitly by the first
/// write into it.
pub trait ResponseStore: Send + Sync {
  /// Store a response, replacing any entry with the same key in that cache.
  fn put(&self, cache_name: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Store several responses atomically: either all are written or none.
  fn put_all(&self, cache_name: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

  /// Look up a key in one cache.
  fn get(&self, cache_name: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Look up a key across every cache.
  ///
  /// Caches listed in `preferred` win in the given order; otherwise the most
  /// recently written entry is returned.
  fn match_request(&self, key: &CacheKey, preferred: &[&str]) -> Result<Option<CachedResponse>>;

  /// Names of all caches currently stored.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Delete a cache and every entry in it. Returns false if it did not exist.
  fn delete_cache(&self, cache_name: &str) -> Result<bool>;

  /// Flag a cache as fully populated.
  fn mark_complete(&self, cache_name: &str) -> Result<()>;

  /// Whether a cache exists and was flagged as fully populated.
  fn is_complete(&self, cache_name: &str) -> Result<bool>;
}

/// SQLite-based response cache.
pub struct SqliteCacheStorage {
  conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Cache that lives only as long as the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named cache (generation)
CREATE TABLE IF NOT EXISTS cache_names (
    name TEXT PRIMARY KEY,
    complete INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS cached_responses (
    cache_name TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, method, url)
);

CREATE INDEX IF NOT EXISTS idx_cached_responses_request
    ON cached_responses(method, url);
"#;

const INSERT_RESPONSE: &str =
  "INSERT OR REPLACE INTO cached_responses (cache_name, method, url, status, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, datetime('now'))";

const ENSURE_CACHE: &str = "INSERT OR IGNORE INTO cache_names (name) VALUES (?)";

type Row = (String, u16, String, Vec<u8>, String);

fn row_to_cached(row: Row) -> Result<CachedResponse> {
  let (cache_name, status, headers, body, cached_at) = row;
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;
  Ok(CachedResponse {
    response: Response {
      status,
      headers,
      body,
    },
    cache_name,
    cached_at: parse_datetime(&cached_at)?,
  })
}

fn insert_response(
  conn: &Connection,
  cache_name: &str,
  key: &CacheKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(ENSURE_CACHE, params![cache_name])
    .map_err(|e| eyre!("Failed to create cache {}: {}", cache_name, e))?;
  conn
    .execute(
      INSERT_RESPONSE,
      params![
        cache_name,
        key.method,
        key.url,
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", key.url, e))?;

  Ok(())
}

impl ResponseStore for SqliteCacheStorage {
  fn put(&self, cache_name: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    insert_response(&conn, cache_name, key, response)
  }

  fn put_all(&self, cache_name: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for (key, response) in entries {
      insert_response(&tx, cache_name, key, response)?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, cache_name: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<Row> = conn
      .query_row(
        "SELECT cache_name, status, headers, body, cached_at FROM cached_responses
         WHERE cache_name = ? AND method = ? AND url = ?",
        params![cache_name, key.method, key.url],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    row.map(row_to_cached).transpose()
  }

  fn match_request(&self, key: &CacheKey, preferred: &[&str]) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT cache_name, status, headers, body, cached_at FROM cached_responses
         WHERE method = ? AND url = ?
         ORDER BY cached_at DESC, rowid DESC",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<Row> = stmt
      .query_map(params![key.method, key.url], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .map_err(|e| eyre!("Failed to query cache entries: {}", e))?
      .collect::<std::result::Result<_, _>>()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    // Rows are newest first and min_by_key keeps the first minimum.
    let best = rows.into_iter().min_by_key(|(cache_name, ..)| {
      preferred
        .iter()
        .position(|p| *p == cache_name.as_str())
        .unwrap_or(preferred.len())
    });

    best.map(row_to_cached).transpose()
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_names ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to list caches: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, cache_name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute(
      "DELETE FROM cached_responses WHERE cache_name = ?",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to delete entries of cache {}: {}", cache_name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_names WHERE name = ?", params![cache_name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache_name, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn mark_complete(&self, cache_name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT INTO cache_names (name, complete) VALUES (?, 1)
         ON CONFLICT(name) DO UPDATE SET complete = 1",
        params![cache_name],
      )
      .map_err(|e| eyre!("Failed to mark cache {} complete: {}", cache_name, e))?;

    Ok(())
  }

  fn is_complete(&self, cache_name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let complete: Option<bool> = conn
      .query_row(
        "SELECT complete FROM cache_names WHERE name = ?",
        params![cache_name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache {}: {}", cache_name, e))?;

    Ok(complete.unwrap_or(false))
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(path: &str) -> CacheKey {
    CacheKey::new("GET", format!("http://localhost:3000{}", path))
  }

  #[test]
  fn test_put_overwrites_same_key() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    storage
      .put("runtime-v1", &key("/api/transaction"), &Response::new(200, "[1]"))
      .unwrap();
    storage
      .put("runtime-v1", &key("/api/transaction"), &Response::new(200, "[2]"))
      .unwrap();

    let cached = storage
      .get("runtime-v1", &key("/api/transaction"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response.body, b"[2]");
    assert_eq!(storage.cache_names().unwrap(), vec!["runtime-v1"]);
  }

  #[test]
  fn test_match_prefers_listed_caches() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    storage
      .put("static-v1", &key("/index.js"), &Response::new(200, "old"))
      .unwrap();
    storage
      .put("static-v2", &key("/index.js"), &Response::new(200, "new"))
      .unwrap();

    let hit = storage
      .match_request(&key("/index.js"), &["static-v2", "runtime-v2"])
      .unwrap()
      .unwrap();
    assert_eq!(hit.cache_name, "static-v2");
    assert_eq!(hit.response.body, b"new");

    let hit = storage
      .match_request(&key("/index.js"), &["static-v1"])
      .unwrap()
      .unwrap();
    assert_eq!(hit.response.body, b"old");

    assert!(storage
      .match_request(&key("/missing.css"), &["static-v2"])
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_match_falls_back_to_any_cache() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    storage
      .put("static-v1", &key("/styles.css"), &Response::new(200, "body{}"))
      .unwrap();

    let hit = storage
      .match_request(&key("/styles.css"), &["static-v2", "runtime-v2"])
      .unwrap()
      .unwrap();
    assert_eq!(hit.cache_name, "static-v1");
  }

  #[test]
  fn test_delete_cache_removes_entries() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    storage
      .put("static-v1", &key("/"), &Response::new(200, "<html>"))
      .unwrap();

    assert!(storage.delete_cache("static-v1").unwrap());
    assert!(!storage.delete_cache("static-v1").unwrap());
    assert!(storage.get("static-v1", &key("/")).unwrap().is_none());
    assert!(storage.cache_names().unwrap().is_empty());
  }

  #[test]
  fn test_complete_flag() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    assert!(!storage.is_complete("static-v1").unwrap());

    storage
      .put_all(
        "static-v1",
        &[
          (key("/"), Response::new(200, "<html>")),
          (key("/index.js"), Response::new(200, "js")),
        ],
      )
      .unwrap();
    assert!(!storage.is_complete("static-v1").unwrap());

    storage.mark_complete("static-v1").unwrap();
    assert!(storage.is_complete("static-v1").unwrap());
  }

  #[test]
  fn test_headers_survive_storage() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    let mut response = Response::new(200, "body{}");
    response
      .headers
      .push(("content-type".to_string(), "text/css".to_string()));
    storage.put("static-v1", &key("/styles.css"), &response).unwrap();

    let cached = storage
      .get("static-v1", &key("/styles.css"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response, response);
  }
}
