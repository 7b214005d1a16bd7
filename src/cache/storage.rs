//! Cache storage trait and its in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

use super::request::Response;

/// A stored response together with the time it was admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Named buckets of request/response pairs.
///
/// Writing into a namespace that does not exist yet creates it.
pub trait CacheStorage: Send + Sync {
  /// All namespaces in creation order.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Create the namespace if it is absent.
  fn open(&self, namespace: &str) -> Result<()>;

  /// Delete a namespace and every entry in it. Returns whether it existed.
  fn delete(&self, namespace: &str) -> Result<bool>;

  /// Look up an entry in one namespace.
  fn lookup(&self, namespace: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Look up an entry in every namespace, oldest namespace first.
  fn lookup_any(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// Store a single entry, replacing any previous one.
  fn put(&self, namespace: &str, key: &str, response: &Response) -> Result<()>;

  /// Store a batch of entries. Either all of them land or none do.
  fn put_all(&self, namespace: &str, entries: &[(String, Response)]) -> Result<()>;
}

/// Storage kept in process memory. Used by tests and `--ephemeral` runs.
#[derive(Default)]
pub struct MemoryCacheStorage {
  inner: Mutex<Vec<(String, HashMap<String, CachedResponse>)>>,
}

impl MemoryCacheStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_inner<R>(
    &self,
    f: impl FnOnce(&mut Vec<(String, HashMap<String, CachedResponse>)>) -> R,
  ) -> Result<R> {
    let mut guard = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut guard))
  }
}

fn bucket<'a>(
  buckets: &'a mut Vec<(String, HashMap<String, CachedResponse>)>,
  namespace: &str,
) -> &'a mut HashMap<String, CachedResponse> {
  let idx = match buckets.iter().position(|(name, _)| name == namespace) {
    Some(idx) => idx,
    None => {
      buckets.push((namespace.to_string(), HashMap::new()));
      buckets.len() - 1
    }
  };
  &mut buckets[idx].1
}

impl CacheStorage for MemoryCacheStorage {
  fn namespaces(&self) -> Result<Vec<String>> {
    self.with_inner(|b| b.iter().map(|(name, _)| name.clone()).collect())
  }

  fn open(&self, namespace: &str) -> Result<()> {
    self.with_inner(|b| {
      bucket(b, namespace);
    })
  }

  fn delete(&self, namespace: &str) -> Result<bool> {
    self.with_inner(|b| {
      let before = b.len();
      b.retain(|(name, _)| name != namespace);
      b.len() != before
    })
  }

  fn lookup(&self, namespace: &str, key: &str) -> Result<Option<CachedResponse>> {
    self.with_inner(|b| {
      b.iter()
        .find(|(name, _)| name == namespace)
        .and_then(|(_, entries)| entries.get(key).cloned())
    })
  }

  fn lookup_any(&self, key: &str) -> Result<Option<CachedResponse>> {
    self.with_inner(|b| b.iter().find_map(|(_, entries)| entries.get(key).cloned()))
  }

  fn put(&self, namespace: &str, key: &str, response: &Response) -> Result<()> {
    self.with_inner(|b| {
      bucket(b, namespace).insert(
        key.to_string(),
        CachedResponse {
          response: response.clone(),
          cached_at: Utc::now(),
        },
      );
    })
  }

  fn put_all(&self, namespace: &str, entries: &[(String, Response)]) -> Result<()> {
    // Single lock acquisition, so readers never observe a partial batch
    self.with_inner(|b| {
      let target = bucket(b, namespace);
      let now = Utc::now();
      for (key, response) in entries {
        target.insert(
          key.clone(),
          CachedResponse {
            response: response.clone(),
            cached_at: now,
          },
        );
      }
    })
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteCacheStorage {
  conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
  /// Wrap a connection whose schema has already been migrated.
  pub fn new(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
    }
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// SHA256 of the request key, for fixed-length primary keys.
fn request_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

fn ensure_namespace(conn: &Connection, namespace: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to create cache namespace {}: {}", namespace, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, namespace: &str, key: &str, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (namespace, request_hash, request_key, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        namespace,
        request_hash(key),
        key,
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

  Ok(())
}

type EntryRow = (u16, String, Vec<u8>, String);

fn row_to_cached(row: EntryRow) -> Result<CachedResponse> {
  let (status, headers, body, cached_at) = row;
  let headers: Vec<(String, String)> =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;

  Ok(CachedResponse {
    response: Response {
      status,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteCacheStorage {
  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache namespace: {}", e))?;

    Ok(names)
  }

  fn open(&self, namespace: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_namespace(&conn, namespace)
  }

  fn delete(&self, namespace: &str) -> Result<bool> {
    let conn = self.lock()?;
    // Entries go with the namespace through ON DELETE CASCADE
    let deleted = conn
      .execute(
        "DELETE FROM cache_namespaces WHERE name = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete cache namespace {}: {}", namespace, e))?;
    Ok(deleted > 0)
  }

  fn lookup(&self, namespace: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE namespace = ? AND request_hash = ?",
        params![namespace, request_hash(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache entry {}: {}", key, e))?;

    row.map(row_to_cached).transpose()
  }

  fn lookup_any(&self, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT ce.status, ce.headers, ce.body, ce.cached_at FROM cache_entries ce
         INNER JOIN cache_namespaces cn ON cn.name = ce.namespace
         WHERE ce.request_hash = ?
         ORDER BY cn.seq
         LIMIT 1",
        params![request_hash(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache entry {}: {}", key, e))?;

    row.map(row_to_cached).transpose()
  }

  fn put(&self, namespace: &str, key: &str, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    ensure_namespace(&conn, namespace)?;
    insert_entry(&conn, namespace, key, response)
  }

  fn put_all(&self, namespace: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_namespace(&tx, namespace)?;
    for (key, response) in entries {
      insert_entry(&tx, namespace, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
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
  use crate::db::Database;

  fn sqlite() -> SqliteCacheStorage {
    SqliteCacheStorage::new(Database::open_in_memory().unwrap().into_connection())
  }

  fn ok(body: &str) -> Response {
    Response::new(200, vec![("Content-Type".into(), "text/plain".into())], body)
  }

  fn exercise(storage: &dyn CacheStorage) {
    storage.open("v1-static").unwrap();
    storage.put("v1-dynamic", "GET /a", &ok("dyn")).unwrap();
    storage
      .put_all(
        "v1-static",
        &[("GET /a".into(), ok("static")), ("GET /b".into(), ok("b"))],
      )
      .unwrap();

    assert_eq!(storage.namespaces().unwrap(), vec!["v1-static", "v1-dynamic"]);

    let hit = storage.lookup("v1-dynamic", "GET /a").unwrap().unwrap();
    assert_eq!(hit.response.body, b"dyn");

    // Oldest namespace wins on a global match
    let any = storage.lookup_any("GET /a").unwrap().unwrap();
    assert_eq!(any.response.body, b"static");
    assert_eq!(any.response.header("content-type"), Some("text/plain"));

    assert!(storage.lookup("v1-dynamic", "GET /b").unwrap().is_none());

    assert!(storage.delete("v1-static").unwrap());
    assert!(!storage.delete("v1-static").unwrap());
    assert_eq!(storage.namespaces().unwrap(), vec!["v1-dynamic"]);
    assert!(storage.lookup_any("GET /b").unwrap().is_none());
  }

  #[test]
  fn test_memory_storage() {
    exercise(&MemoryCacheStorage::new());
  }

  #[test]
  fn test_sqlite_storage() {
    exercise(&sqlite());
  }

  #[test]
  fn test_sqlite_put_replaces_entry() {
    let storage = sqlite();
    storage.put("ns", "GET /x", &ok("one")).unwrap();
    storage.put("ns", "GET /x", &ok("two")).unwrap();

    let hit = storage.lookup("ns", "GET /x").unwrap().unwrap();
    assert_eq!(hit.response.body, b"two");
  }

  #[test]
  fn test_sqlite_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let storage = SqliteCacheStorage::new(Database::open(&path).unwrap().into_connection());
      storage.put("ns", "GET /x", &ok("kept")).unwrap();
    }

    let storage = SqliteCacheStorage::new(Database::open(&path).unwrap().into_connection());
    let hit = storage.lookup("ns", "GET /x").unwrap().unwrap();
    assert_eq!(hit.response.body, b"kept");
  }
}
