//! The persistent key-value area shared by every context of one origin.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// Identifies one execution context (a tab, a window, a process handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
  pub fn next() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Self(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

impl std::fmt::Display for ContextId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "ctx-{}", self.0)
  }
}

/// Notification that a key changed, as seen by the other contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
  pub key: String,
  /// New serialized value, `None` when the key was removed
  pub new_value: Option<String>,
  /// Context that made the change
  pub origin: ContextId,
}

/// Flat string-to-string persistence.
pub trait KeyValueBackend: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;
  fn set_item(&self, key: &str, value: &str) -> Result<()>;
  fn remove_item(&self, key: &str) -> Result<()>;
  fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory backend with an optional quota on the total stored size.
#[derive(Default)]
pub struct MemoryBackend {
  items: Mutex<HashMap<String, String>>,
  quota_bytes: Option<usize>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_quota(quota_bytes: usize) -> Self {
    Self {
      items: Mutex::new(HashMap::new()),
      quota_bytes: Some(quota_bytes),
    }
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
    self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl KeyValueBackend for MemoryBackend {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let mut items = self.lock()?;
    if let Some(quota) = self.quota_bytes {
      let used: usize = items
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
      if used + key.len() + value.len() > quota {
        return Err(eyre!("Storage quota exceeded writing {}", key));
      }
    }
    items.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    self.lock()?.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
    keys.sort();
    Ok(keys)
  }
}

/// SQLite-backed key-value area.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
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

impl KeyValueBackend for SqliteBackend {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv_store ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }
}

/// A backend plus the change feed other contexts listen to.
///
/// Writes are announced to every subscriber, including the writer; each
/// context filters out its own changes by [`ContextId`].
pub struct StorageArea {
  backend: Box<dyn KeyValueBackend>,
  changes: broadcast::Sender<StorageChange>,
}

impl StorageArea {
  pub fn new(backend: impl KeyValueBackend + 'static) -> Self {
    let (changes, _rx) = broadcast::channel(256);
    Self {
      backend: Box::new(backend),
      changes,
    }
  }

  pub fn in_memory() -> Self {
    Self::new(MemoryBackend::new())
  }

  pub fn get_item(&self, key: &str) -> Result<Option<String>> {
    self.backend.get_item(key)
  }

  pub fn set_item(&self, key: &str, value: &str, origin: ContextId) -> Result<()> {
    self.backend.set_item(key, value)?;
    self.announce(StorageChange {
      key: key.to_string(),
      new_value: Some(value.to_string()),
      origin,
    });
    Ok(())
  }

  pub fn remove_item(&self, key: &str, origin: ContextId) -> Result<()> {
    self.backend.remove_item(key)?;
    self.announce(StorageChange {
      key: key.to_string(),
      new_value: None,
      origin,
    });
    Ok(())
  }

  pub fn keys(&self) -> Result<Vec<String>> {
    self.backend.keys()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
    self.changes.subscribe()
  }

  fn announce(&self, change: StorageChange) {
    // No listeners is fine: nobody else has the origin open
    if self.changes.send(change).is_err() {
      debug!("storage change with no listeners");
    }
  }
}
