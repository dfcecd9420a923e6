//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::cache::{CacheStorage, MemoryStorage, StoredResponse};
use crate::error::{CacheError, FetchError};
use crate::fetch::Fetcher;
use crate::http::{ProxyRequest, RequestKey, Response, ResponseSource, ResponseType};

pub const ORIGIN: &str = "http://localhost:3000";

pub fn url(path: &str) -> url::Url {
  url::Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn ok(body: &str) -> Response {
  with_status(200, body)
}

pub fn with_status(status: u16, body: &str) -> Response {
  Response {
    status,
    status_text: String::new(),
    headers: vec![("content-type".into(), "text/plain".into())],
    body: Bytes::from(body.to_string()),
    response_type: ResponseType::Basic,
    source: ResponseSource::Network,
  }
}

/// Scripted network: answers by path + query, counts every call.
#[derive(Default)]
pub struct StubFetcher {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl StubFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(self, path: &str, response: Response) -> Self {
    self.set(path, response);
    self
  }

  pub fn set(&self, path: &str, response: Response) {
    self.routes.lock().unwrap().insert(path.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_to(&self, path: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|p| *p == path).count()
  }
}

fn route_key(request: &ProxyRequest) -> String {
  match request.url.query() {
    Some(q) => format!("{}?{}", request.url.path(), q),
    None => request.url.path().to_string(),
  }
}

#[async_trait]
impl Fetcher for StubFetcher {
  async fn fetch(&self, request: &ProxyRequest) -> Result<Response, FetchError> {
    let key = route_key(request);
    self.calls.lock().unwrap().push(key.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(FetchError::NetworkUnavailable("stub offline".into()));
    }

    self
      .routes
      .lock()
      .unwrap()
      .get(&key)
      .cloned()
      .ok_or_else(|| FetchError::NetworkUnavailable(format!("no route for {}", key)))
  }
}

/// Memory storage that counts entry reads and writes, and can be told to
/// fail store listings.
#[derive(Default)]
pub struct CountingStorage {
  inner: MemoryStorage,
  pub reads: AtomicUsize,
  pub writes: AtomicUsize,
  pub fail_listing: AtomicBool,
}

impl CountingStorage {
  pub fn touches(&self) -> usize {
    self.reads.load(Ordering::SeqCst) + self.writes.load(Ordering::SeqCst)
  }
}

impl CacheStorage for CountingStorage {
  fn open_store(&self, name: &str) -> Result<(), CacheError> {
    self.inner.open_store(name)
  }

  fn has_store(&self, name: &str) -> Result<bool, CacheError> {
    self.inner.has_store(name)
  }

  fn store_names(&self) -> Result<BTreeSet<String>, CacheError> {
    if self.fail_listing.load(Ordering::SeqCst) {
      return Err(CacheError::Storage("listing disabled".into()));
    }
    self.inner.store_names()
  }

  fn delete_store(&self, name: &str) -> Result<bool, CacheError> {
    self.inner.delete_store(name)
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>, CacheError> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    self.inner.get(store, key)
  }

  fn put(&self, store: &str, key: &RequestKey, response: &StoredResponse) -> Result<(), CacheError> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.put(store, key, response)
  }

  fn entry_count(&self, store: &str) -> Result<usize, CacheError> {
    self.inner.entry_count(store)
  }

  fn load_meta(&self, key: &str) -> Result<Option<String>, CacheError> {
    self.inner.load_meta(key)
  }

  fn save_meta(&self, key: &str, value: &str) -> Result<(), CacheError> {
    self.inner.save_meta(key, value)
  }

  fn delete_meta(&self, key: &str) -> Result<(), CacheError> {
    self.inner.delete_meta(key)
  }
}
