//! Registry of named cache stores.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::StoredResponse;
use crate::error::CacheError;
use crate::http::{ProxyRequest, Response};

/// Owns the storage backend and hands out named store handles.
///
/// Nothing else holds the backend directly; components talk to stores only
/// through a [`StoreHandle`] obtained here.
#[derive(Clone)]
pub struct CacheRegistry {
  storage: Arc<dyn CacheStorage>,
}

impl CacheRegistry {
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  #[cfg(test)]
  pub fn from_shared(storage: Arc<dyn CacheStorage>) -> Self {
    Self { storage }
  }

  /// Open a store, creating it when absent.
  pub fn open(&self, name: &str) -> Result<StoreHandle, CacheError> {
    self.storage.open_store(name)?;
    Ok(self.handle(name))
  }

  /// Handle to an existing store. Never creates one.
  pub fn lookup(&self, name: &str) -> Result<Option<StoreHandle>, CacheError> {
    if self.storage.has_store(name)? {
      Ok(Some(self.handle(name)))
    } else {
      Ok(None)
    }
  }

  pub fn list_stores(&self) -> Result<BTreeSet<String>, CacheError> {
    self.storage.store_names()
  }

  /// Remove a store and everything in it. Missing names are fine.
  pub fn delete(&self, name: &str) -> Result<bool, CacheError> {
    self.storage.delete_store(name)
  }

  pub(crate) fn load_meta(&self, key: &str) -> Result<Option<String>, CacheError> {
    self.storage.load_meta(key)
  }

  pub(crate) fn save_meta(&self, key: &str, value: &str) -> Result<(), CacheError> {
    self.storage.save_meta(key, value)
  }

  pub(crate) fn delete_meta(&self, key: &str) -> Result<(), CacheError> {
    self.storage.delete_meta(key)
  }

  fn handle(&self, name: &str) -> StoreHandle {
    StoreHandle {
      name: name.to_string(),
      storage: Arc::clone(&self.storage),
    }
  }
}

/// Named handle to one cache store.
#[derive(Clone)]
pub struct StoreHandle {
  name: String,
  storage: Arc<dyn CacheStorage>,
}

impl StoreHandle {
  /// Exact match on method + URL.
  pub fn match_request(&self, request: &ProxyRequest) -> Result<Option<StoredResponse>, CacheError> {
    self.storage.get(&self.name, &request.cache_key())
  }

  /// Store a copy of `response` under the request's key, replacing any
  /// previous entry. `response` itself is left for the caller.
  pub fn put(&self, request: &ProxyRequest, response: &Response) -> Result<(), CacheError> {
    let snapshot = StoredResponse::capture(response);
    self.storage.put(&self.name, &request.cache_key(), &snapshot)
  }

  pub fn len(&self) -> Result<usize, CacheError> {
    self.storage.entry_count(&self.name)
  }
}
