//! Cache storage trait with SQLite and in-memory implementations.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;

use super::traits::StoredResponse;
use crate::error::CacheError;
use crate::http::RequestKey;

type Result<T> = std::result::Result<T, CacheError>;

/// Trait for cache storage backends.
///
/// Every operation replaces or reads a single row/entry atomically, so
/// concurrent writers to the same key simply race and the last one wins.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Check whether the named store exists.
  fn has_store(&self, name: &str) -> Result<bool>;

  /// Names of all existing stores.
  fn store_names(&self) -> Result<BTreeSet<String>>;

  /// Remove a store with all its entries. Returns whether it existed.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Exact-match lookup of a request key in a store.
  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>>;

  /// Insert or overwrite an entry. The store must exist.
  fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<()>;

  /// Number of entries in a store (0 when missing).
  fn entry_count(&self, store: &str) -> Result<usize>;

  /// Read a metadata value.
  fn load_meta(&self, key: &str) -> Result<Option<String>>;

  /// Write a metadata value.
  fn save_meta(&self, key: &str, value: &str) -> Result<()>;

  /// Remove a metadata value. Missing keys are fine.
  fn delete_meta(&self, key: &str) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn open_store(&self, _name: &str) -> Result<()> {
    Ok(())
  }

  fn has_store(&self, _name: &str) -> Result<bool> {
    Ok(false)
  }

  fn store_names(&self) -> Result<BTreeSet<String>> {
    Ok(BTreeSet::new())
  }

  fn delete_store(&self, _name: &str) -> Result<bool> {
    Ok(false)
  }

  fn get(&self, _store: &str, _key: &RequestKey) -> Result<Option<StoredResponse>> {
    Ok(None) // Always miss
  }

  fn put(&self, _store: &str, _key: &RequestKey, _response: &StoredResponse) -> Result<()> {
    Ok(()) // Discard
  }

  fn entry_count(&self, _store: &str) -> Result<usize> {
    Ok(0)
  }

  fn load_meta(&self, _key: &str) -> Result<Option<String>> {
    Ok(None)
  }

  fn save_meta(&self, _key: &str, _value: &str) -> Result<()> {
    Ok(())
  }

  fn delete_meta(&self, _key: &str) -> Result<()> {
    Ok(())
  }
}

/// In-process storage, optionally bounded by a total entry capacity.
#[derive(Default)]
pub struct MemoryStorage {
  stores: Mutex<HashMap<String, HashMap<RequestKey, StoredResponse>>>,
  meta: Mutex<HashMap<String, String>>,
  capacity: Option<usize>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Limit the total number of entries across all stores.
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      capacity: Some(capacity),
      ..Self::default()
    }
  }

  fn stores(
    &self,
  ) -> Result<std::sync::MutexGuard<'_, HashMap<String, HashMap<RequestKey, StoredResponse>>>> {
    self
      .stores
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl CacheStorage for MemoryStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    self.stores()?.entry(name.to_string()).or_default();
    Ok(())
  }

  fn has_store(&self, name: &str) -> Result<bool> {
    Ok(self.stores()?.contains_key(name))
  }

  fn store_names(&self) -> Result<BTreeSet<String>> {
    Ok(self.stores()?.keys().cloned().collect())
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    Ok(self.stores()?.remove(name).is_some())
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    Ok(
      self
        .stores()?
        .get(store)
        .and_then(|entries| entries.get(key))
        .cloned(),
    )
  }

  fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let mut stores = self.stores()?;
    let total: usize = stores.values().map(HashMap::len).sum();

    let entries = stores
      .get_mut(store)
      .ok_or_else(|| CacheError::StoreMissing(store.to_string()))?;

    if let Some(capacity) = self.capacity {
      if !entries.contains_key(key) && total >= capacity {
        return Err(CacheError::QuotaExceeded {
          store: store.to_string(),
        });
      }
    }

    entries.insert(key.clone(), response.clone());
    Ok(())
  }

  fn entry_count(&self, store: &str) -> Result<usize> {
    Ok(self.stores()?.get(store).map(HashMap::len).unwrap_or(0))
  }

  fn load_meta(&self, key: &str) -> Result<Option<String>> {
    let meta = self
      .meta
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))?;
    Ok(meta.get(key).cloned())
  }

  fn save_meta(&self, key: &str, value: &str) -> Result<()> {
    let mut meta = self
      .meta
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))?;
    meta.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn delete_meta(&self, key: &str) -> Result<()> {
    self
      .meta
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))?
      .remove(key);
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Storage(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::Storage(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Open a throwaway database that lives only as long as this value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| CacheError::Storage(format!("Failed to open in-memory cache: {}", e)))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Option<std::path::PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
    Some(data_dir.join("swcache").join("cache.db"))
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| storage_error("Failed to run cache migrations", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per named store
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses (serialized JSON), keyed by request digest
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, key_hash),
    FOREIGN KEY (store) REFERENCES cache_stores(name) ON DELETE CASCADE
);

-- Small key/value table (current generation tag)
CREATE TABLE IF NOT EXISTS proxy_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

fn storage_error(context: &str, e: rusqlite::Error) -> CacheError {
  match e {
    rusqlite::Error::SqliteFailure(ref err, _) if err.code == rusqlite::ErrorCode::DiskFull => {
      CacheError::QuotaExceeded {
        store: context.to_string(),
      }
    }
    e => CacheError::Storage(format!("{}: {}", context, e)),
  }
}

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| storage_error("Failed to open store", e))?;
    Ok(())
  }

  fn has_store(&self, name: &str) -> Result<bool> {
    let found: Option<i64> = self
      .conn()?
      .query_row(
        "SELECT 1 FROM cache_stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| storage_error("Failed to look up store", e))?;
    Ok(found.is_some())
  }

  fn store_names(&self) -> Result<BTreeSet<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores")
      .map_err(|e| storage_error("Failed to prepare query", e))?;

    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| storage_error("Failed to list stores", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| storage_error("Failed to begin transaction", e))?;

    tx.execute("DELETE FROM cache_entries WHERE store = ?", params![name])
      .map_err(|e| storage_error("Failed to delete store entries", e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| storage_error("Failed to delete store", e))?;

    tx.commit()
      .map_err(|e| storage_error("Failed to commit transaction", e))?;

    Ok(removed > 0)
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let data: Option<Vec<u8>> = self
      .conn()?
      .query_row(
        "SELECT data FROM cache_entries WHERE store = ? AND key_hash = ?",
        params![store, key.digest()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| storage_error("Failed to query entry", e))?;

    match data {
      Some(data) => {
        let response = serde_json::from_slice(&data)
          .map_err(|e| CacheError::Storage(format!("Failed to deserialize entry: {}", e)))?;
        Ok(Some(response))
      }
      None => Ok(None),
    }
  }

  fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let data = serde_json::to_vec(response)
      .map_err(|e| CacheError::Storage(format!("Failed to serialize entry: {}", e)))?;

    let conn = self.conn()?;
    let written = conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (store, key_hash, request_key, data, cached_at)
         SELECT ?1, ?2, ?3, ?4, datetime('now')
         WHERE EXISTS (SELECT 1 FROM cache_stores WHERE name = ?1)",
        params![store, key.digest(), key.to_string(), data],
      )
      .map_err(|e| storage_error("Failed to store entry", e))?;

    if written == 0 {
      return Err(CacheError::StoreMissing(store.to_string()));
    }
    Ok(())
  }

  fn entry_count(&self, store: &str) -> Result<usize> {
    let count: i64 = self
      .conn()?
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE store = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| storage_error("Failed to count entries", e))?;
    Ok(count as usize)
  }

  fn load_meta(&self, key: &str) -> Result<Option<String>> {
    self
      .conn()?
      .query_row(
        "SELECT value FROM proxy_meta WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| storage_error("Failed to read metadata", e))
  }

  fn save_meta(&self, key: &str, value: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO proxy_meta (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| storage_error("Failed to write metadata", e))?;
    Ok(())
  }

  fn delete_meta(&self, key: &str) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM proxy_meta WHERE key = ?", params![key])
      .map_err(|e| storage_error("Failed to delete metadata", e))?;
    Ok(())
  }
}
