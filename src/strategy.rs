//! Strategy executor: serves a classified request from cache and/or network.
//!
//! Every cache failure here is fail-open: a broken read counts as a miss and
//! a broken write is logged while the response still goes back to the
//! caller.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheRegistry, StoredResponse};
use crate::classify::RequestClass;
use crate::error::{FetchError, ProxyError};
use crate::fallback::offline_response;
use crate::fetch::Fetcher;
use crate::http::{ProxyRequest, Response, ResponseSource, ResponseType};
use crate::lifecycle::{Generation, GenerationDescriptor};
use crate::tasks::TaskQueue;

/// Which of a generation's two stores to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreKind {
  Static,
  Api,
}

impl StoreKind {
  fn name(self, generation: &Generation) -> String {
    match self {
      StoreKind::Static => generation.static_store(),
      StoreKind::Api => generation.api_store(),
    }
  }
}

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  StaleWhileRevalidate,
  NetworkOnly,
}

impl From<RequestClass> for Strategy {
  fn from(class: RequestClass) -> Self {
    match class {
      RequestClass::StaticAsset => Strategy::CacheFirst,
      RequestClass::PublicApi => Strategy::StaleWhileRevalidate,
      RequestClass::Other => Strategy::NetworkOnly,
    }
  }
}

/// Cheap to clone; clones share the registry, network and task queue.
#[derive(Clone)]
pub struct StrategyExecutor {
  inner: Arc<Inner>,
}

struct Inner {
  registry: CacheRegistry,
  descriptor: GenerationDescriptor,
  fetcher: Arc<dyn Fetcher>,
  tasks: TaskQueue,
  shell: ProxyRequest,
}

impl StrategyExecutor {
  pub fn new(
    registry: CacheRegistry,
    descriptor: GenerationDescriptor,
    fetcher: Arc<dyn Fetcher>,
    tasks: TaskQueue,
    shell: ProxyRequest,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        registry,
        descriptor,
        fetcher,
        tasks,
        shell,
      }),
    }
  }

  pub async fn execute(
    &self,
    strategy: Strategy,
    request: ProxyRequest,
  ) -> Result<Response, ProxyError> {
    match strategy {
      Strategy::CacheFirst => Ok(self.cache_first(request).await),
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
      Strategy::NetworkOnly => self.network_only(request).await,
    }
  }

  /// Static assets: the generation's store answers, the network fills gaps.
  pub async fn cache_first(&self, request: ProxyRequest) -> Response {
    let generation = self.inner.descriptor.current().await;

    if let Some(cached) = self.lookup(generation.as_ref(), StoreKind::Static, &request) {
      debug!(url = %request.url, "Serving from cache");
      return cached.into_response();
    }

    match self.inner.fetcher.fetch(&request).await {
      Ok(response) => {
        if response.status == 200 && response.response_type == ResponseType::Basic {
          self
            .store(generation.as_ref(), StoreKind::Static, &request, &response)
            .await;
        }
        response
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network failed for static asset");
        if request.is_navigation() {
          if let Some(shell) = self.shell(generation.as_ref()) {
            return shell;
          }
        }
        offline_response()
      }
    }
  }

  /// Public API reads: answer from cache at once and refresh in the
  /// background; without a cached entry the network answers directly.
  pub async fn stale_while_revalidate(
    &self,
    request: ProxyRequest,
  ) -> Result<Response, ProxyError> {
    let generation = self.inner.descriptor.current().await;

    if let Some(cached) = self.lookup(generation.as_ref(), StoreKind::Api, &request) {
      debug!(url = %request.url, "Serving from cache, revalidating in background");
      let response = cached.into_response();
      self.revalidate(generation, request);
      return Ok(response);
    }

    let response = self.inner.fetcher.fetch(&request).await?;
    if response.ok() {
      self
        .store(generation.as_ref(), StoreKind::Api, &request, &response)
        .await;
    }
    Ok(response)
  }

  /// Everything else: the network answers; only navigations get the shell
  /// page when it does not.
  pub async fn network_only(&self, request: ProxyRequest) -> Result<Response, ProxyError> {
    match self.inner.fetcher.fetch(&request).await {
      Ok(response) => Ok(response),
      Err(e) if request.is_navigation() => {
        let generation = self.inner.descriptor.current().await;
        self.shell(generation.as_ref()).ok_or(ProxyError::Network(e))
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Spawn the detached refresh for a cached API entry.
  fn revalidate(&self, generation: Option<Generation>, request: ProxyRequest) {
    let executor = self.clone();
    let label = format!("revalidate {}", request.url);

    self.inner.tasks.spawn(label, async move {
      let response = executor.inner.fetcher.fetch(&request).await?;
      if response.ok() {
        executor
          .store(generation.as_ref(), StoreKind::Api, &request, &response)
          .await;
      }
      Ok::<(), FetchError>(())
    });
  }

  fn lookup(
    &self,
    generation: Option<&Generation>,
    kind: StoreKind,
    request: &ProxyRequest,
  ) -> Option<StoredResponse> {
    let name = kind.name(generation?);

    let result = self
      .inner
      .registry
      .lookup(&name)
      .and_then(|store| match store {
        Some(store) => store.match_request(request),
        None => Ok(None),
      });

    match result {
      Ok(found) => found,
      Err(e) => {
        warn!(store = %name, error = %e, "Cache read failed, treating as miss");
        None
      }
    }
  }

  /// Write `response` into the generation's store, but only while that
  /// generation is still current. The read guard keeps activation from
  /// evicting the store between the check and the write.
  async fn store(
    &self,
    generation: Option<&Generation>,
    kind: StoreKind,
    request: &ProxyRequest,
    response: &Response,
  ) {
    let Some(generation) = generation else {
      debug!(url = %request.url, "No active generation, not caching");
      return;
    };

    let current = self.inner.descriptor.read().await;
    if (*current).as_ref() != Some(generation) {
      debug!(
        url = %request.url,
        generation = generation.tag(),
        "Generation changed while fetching, dropping write"
      );
      return;
    }

    let name = kind.name(generation);
    let result = self
      .inner
      .registry
      .open(&name)
      .and_then(|store| store.put(request, response));

    if let Err(e) = result {
      warn!(store = %name, url = %request.url, error = %e, "Cache write failed");
    }
    drop(current);
  }

  fn shell(&self, generation: Option<&Generation>) -> Option<Response> {
    self
      .lookup(generation, StoreKind::Static, &self.inner.shell)
      .map(|stored| stored.into_response().with_source(ResponseSource::Shell))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::config::Config;
  use crate::lifecycle::LifecycleManager;
  use crate::testing::{ok, url, with_status, CountingStorage, StubFetcher};
  use bytes::Bytes;
  use reqwest::Method;

  struct Harness {
    executor: StrategyExecutor,
    network: Arc<StubFetcher>,
    registry: CacheRegistry,
    tasks: TaskQueue,
    generation: Generation,
  }

  /// An active generation with empty stores.
  async fn harness_with(storage: Arc<dyn crate::cache::CacheStorage>) -> Harness {
    let config = Config {
      static_assets: vec!["/".into()],
      ..Config::default()
    };
    let registry = CacheRegistry::from_shared(storage);
    let network = Arc::new(StubFetcher::new().route("/", ok("<html>shell</html>")));

    let mut lifecycle = LifecycleManager::new(&config, registry.clone(), network.clone());
    let generation = Generation::from_config(&config);
    lifecycle.install(generation.clone()).await.unwrap();
    lifecycle.activate().await.unwrap();

    let tasks = TaskQueue::new();
    let executor = StrategyExecutor::new(
      registry.clone(),
      lifecycle.descriptor(),
      network.clone(),
      tasks.clone(),
      ProxyRequest::get(url("/")),
    );

    Harness {
      executor,
      network,
      registry,
      tasks,
      generation,
    }
  }

  async fn harness() -> Harness {
    harness_with(Arc::new(MemoryStorage::new())).await
  }

  #[tokio::test]
  async fn test_static_asset_cached_then_served_without_network() {
    let h = harness().await;
    h.network.set("/icon-192.png", ok("png"));

    let first = h.executor.cache_first(ProxyRequest::get(url("/icon-192.png"))).await;
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.text(), "png");
    assert_eq!(h.network.calls_to("/icon-192.png"), 1);

    let second = h.executor.cache_first(ProxyRequest::get(url("/icon-192.png"))).await;
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.text(), "png");
    assert_eq!(h.network.calls_to("/icon-192.png"), 1);
  }

  #[tokio::test]
  async fn test_static_non_200_not_cached() {
    let h = harness().await;
    h.network.set("/icon-512.png", with_status(404, "missing"));

    let response = h.executor.cache_first(ProxyRequest::get(url("/icon-512.png"))).await;
    assert_eq!(response.status, 404);

    let store = h.registry.lookup(&h.generation.static_store()).unwrap().unwrap();
    assert!(store
      .match_request(&ProxyRequest::get(url("/icon-512.png")))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_static_cross_origin_not_cached() {
    let h = harness().await;
    let mut cors = ok("font");
    cors.response_type = ResponseType::Cors;
    h.network.set("/manifest.json", cors);

    let response = h.executor.cache_first(ProxyRequest::get(url("/manifest.json"))).await;
    assert_eq!(response.text(), "font");

    h.executor.cache_first(ProxyRequest::get(url("/manifest.json"))).await;
    assert_eq!(h.network.calls_to("/manifest.json"), 2);
  }

  #[tokio::test]
  async fn test_static_offline_gets_synthetic_response() {
    let h = harness().await;
    h.network.set_offline(true);

    let response = h.executor.cache_first(ProxyRequest::get(url("/static/js/bundle.js"))).await;
    assert_eq!(response.status, 503);
    assert_eq!(response.source, ResponseSource::Offline);
  }

  #[tokio::test]
  async fn test_navigation_offline_gets_shell() {
    let h = harness().await;
    h.network.set_offline(true);

    let response = h
      .executor
      .cache_first(ProxyRequest::navigate(url("/manifest.json")))
      .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.source, ResponseSource::Shell);
    assert_eq!(response.text(), "<html>shell</html>");

    let response = h
      .executor
      .network_only(ProxyRequest::navigate(url("/requests/42")))
      .await
      .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "<html>shell</html>");
  }

  #[tokio::test]
  async fn test_api_miss_is_fetched_and_stored() {
    let h = harness().await;
    h.network.set("/api/stats", ok(r#"{"users":3}"#));

    let response = h
      .executor
      .stale_while_revalidate(ProxyRequest::get(url("/api/stats")))
      .await
      .unwrap();
    assert_eq!(response.source, ResponseSource::Network);

    let store = h.registry.lookup(&h.generation.api_store()).unwrap().unwrap();
    let cached = store
      .match_request(&ProxyRequest::get(url("/api/stats")))
      .unwrap()
      .unwrap();
    assert_eq!(cached.body, response.body.to_vec());
  }

  #[tokio::test]
  async fn test_api_hit_returns_cached_and_refreshes_once() {
    let h = harness().await;
    h.network.set("/api/stats", ok("v1"));
    h.executor
      .stale_while_revalidate(ProxyRequest::get(url("/api/stats")))
      .await
      .unwrap();

    h.network.set("/api/stats", ok("v2"));
    let response = h
      .executor
      .stale_while_revalidate(ProxyRequest::get(url("/api/stats")))
      .await
      .unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.text(), "v1");

    h.tasks.idle().await;
    assert_eq!(h.tasks.spawned(), 1);
    assert_eq!(h.network.calls_to("/api/stats"), 2);

    let refreshed = h
      .executor
      .stale_while_revalidate(ProxyRequest::get(url("/api/stats")))
      .await
      .unwrap();
    assert_eq!(refreshed.text(), "v2");
  }

  #[tokio::test]
  async fn test_api_replayed_offline() {
    let h = harness().await;
    h.network.set("/api/stats", ok("cached stats"));
    h.executor
      .stale_while_revalidate(ProxyRequest::get(url("/api/stats")))
      .await
      .unwrap();

    h.network.set_offline(true);
    let response = h
      .executor
      .stale_while_revalidate(ProxyRequest::get(url("/api/stats")))
      .await
      .unwrap();
    assert_eq!(response.text(), "cached stats");

    h.tasks.idle().await;
    assert_eq!(h.tasks.failed(), 1);
  }

  #[tokio::test]
  async fn test_api_miss_offline_propagates() {
    let h = harness().await;
    h.network.set_offline(true);

    let err = h
      .executor
      .stale_while_revalidate(ProxyRequest::get(url("/api/bank-info")))
      .await
      .unwrap_err();
    assert!(matches!(err, ProxyError::Network(FetchError::NetworkUnavailable(_))));
  }

  #[tokio::test]
  async fn test_api_query_strings_are_distinct_entries() {
    let h = harness().await;
    h.network.set("/api/stats?a=1", ok("one"));
    h.network.set("/api/stats?a=2", ok("two"));

    for q in ["/api/stats?a=1", "/api/stats?a=2"] {
      h.executor
        .stale_while_revalidate(ProxyRequest::get(url(q)))
        .await
        .unwrap();
    }

    let store = h.registry.lookup(&h.generation.api_store()).unwrap().unwrap();
    assert_eq!(store.len().unwrap(), 2);
  }

  #[tokio::test]
  async fn test_network_only_never_touches_cache() {
    let storage = Arc::new(CountingStorage::default());
    let h = harness_with(storage.clone()).await;
    let baseline = storage.touches();

    h.network.set("/api/requests/42", ok("private"));
    let payment = ProxyRequest::new(Method::POST, url("/api/requests/42/payment"))
      .with_body(Bytes::from_static(b"{}"));

    h.executor
      .network_only(ProxyRequest::get(url("/api/requests/42")))
      .await
      .unwrap();
    h.executor.network_only(payment.clone()).await.unwrap_err();

    h.network.set_offline(true);
    let err = h.executor.network_only(payment).await.unwrap_err();
    assert!(matches!(err, ProxyError::Network(_)));

    assert_eq!(storage.touches(), baseline);
  }

  #[tokio::test]
  async fn test_storage_failure_fails_open() {
    let h = harness_with(Arc::new(MemoryStorage::with_capacity(1))).await;
    h.network.set("/icon-192.png", ok("png"));

    // The shell fills the only slot, so this write hits the quota
    let response = h.executor.cache_first(ProxyRequest::get(url("/icon-192.png"))).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "png");
  }

  #[tokio::test]
  async fn test_stale_generation_write_is_dropped() {
    let h = harness().await;
    let old = Some(Generation::new("applezero", "0.9.0"));
    h.executor
      .store(
        old.as_ref(),
        StoreKind::Api,
        &ProxyRequest::get(url("/api/stats")),
        &ok("late"),
      )
      .await;

    assert!(h.registry.lookup("applezero-api-v0.9.0").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_no_generation_serves_uncached() {
    let network = Arc::new(StubFetcher::new().route("/icon-192.png", ok("png")));
    let registry = CacheRegistry::new(MemoryStorage::new());
    let executor = StrategyExecutor::new(
      registry.clone(),
      GenerationDescriptor::new(),
      network.clone(),
      TaskQueue::new(),
      ProxyRequest::get(url("/")),
    );

    let response = executor.cache_first(ProxyRequest::get(url("/icon-192.png"))).await;
    assert_eq!(response.text(), "png");
    assert!(registry.list_stores().unwrap().is_empty());
  }
}
