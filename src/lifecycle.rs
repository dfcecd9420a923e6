//! Cache generation lifecycle: install, activate, evict.
//!
//! A generation moves `Installing -> Waiting -> Active`. Install pre-warms
//! the generation's static store and is all-or-nothing. Activation swaps the
//! current-generation pointer and deletes every store that does not belong
//! to the new generation, holding the descriptor's write lock for the whole
//! swap so no request can observe the new generation before cleanup is done.

use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};
use url::Url;

use crate::cache::CacheRegistry;
use crate::config::Config;
use crate::error::LifecycleError;
use crate::fetch::Fetcher;
use crate::http::{ProxyRequest, Response};

const CURRENT_GENERATION_KEY: &str = "current_generation";
const WAITING_GENERATION_KEY: &str = "waiting_generation";

/// One deployed version of the cache contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Generation {
  prefix: String,
  tag: String,
}

impl Generation {
  pub fn new(prefix: impl Into<String>, tag: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      tag: tag.into(),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(config.app_name.clone(), config.version.clone())
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  /// Store holding the pre-warmed static assets.
  pub fn static_store(&self) -> String {
    format!("{}-v{}", self.prefix, self.tag)
  }

  /// Store holding public API responses.
  pub fn api_store(&self) -> String {
    format!("{}-api-v{}", self.prefix, self.tag)
  }

  /// Whether `store` belongs to this generation.
  pub fn owns(&self, store: &str) -> bool {
    store == self.static_store() || store == self.api_store()
  }
}

/// Shared pointer to the current generation.
///
/// Readers take a snapshot for lookups and re-check under the read lock
/// before writing; activation holds the write lock while it swaps and
/// cleans up.
#[derive(Clone, Default)]
pub struct GenerationDescriptor {
  inner: Arc<RwLock<Option<Generation>>>,
}

impl GenerationDescriptor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Snapshot of the current generation.
  pub async fn current(&self) -> Option<Generation> {
    self.inner.read().await.clone()
  }

  /// Hold the pointer still; activation waits until the guard is dropped.
  pub async fn read(&self) -> RwLockReadGuard<'_, Option<Generation>> {
    self.inner.read().await
  }

  async fn write(&self) -> RwLockWriteGuard<'_, Option<Generation>> {
    self.inner.write().await
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Nothing installed yet
  Idle,
  /// Pre-warming a new generation
  Installing,
  /// Installed, not yet serving
  Waiting,
  /// Current generation serving traffic
  Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub generation: Generation,
  pub assets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub generation: Generation,
  /// Stores deleted by this activation
  pub evicted: Vec<String>,
}

pub struct LifecycleManager {
  registry: CacheRegistry,
  fetcher: Arc<dyn Fetcher>,
  descriptor: GenerationDescriptor,
  origin: Url,
  manifest: Vec<String>,
  prefix: String,
  state: LifecycleState,
  waiting: Option<Generation>,
}

impl LifecycleManager {
  pub fn new(config: &Config, registry: CacheRegistry, fetcher: Arc<dyn Fetcher>) -> Self {
    Self {
      registry,
      fetcher,
      descriptor: GenerationDescriptor::new(),
      origin: config.origin.clone(),
      manifest: config.static_assets.clone(),
      prefix: config.app_name.clone(),
      state: LifecycleState::Idle,
      waiting: None,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn descriptor(&self) -> GenerationDescriptor {
    self.descriptor.clone()
  }

  pub fn waiting(&self) -> Option<&Generation> {
    self.waiting.as_ref()
  }

  /// Pick up what a previous run left behind: the active generation, and a
  /// generation installed but not yet activated. Either is ignored when its
  /// static store is gone.
  pub async fn restore(&mut self) -> Result<Option<Generation>, LifecycleError> {
    let current = self.recorded(CURRENT_GENERATION_KEY)?;
    if let Some(generation) = &current {
      *self.descriptor.write().await = Some(generation.clone());
      self.state = LifecycleState::Active;
      info!(generation = generation.tag(), "Restored current generation");
    }

    if let Some(generation) = self.recorded(WAITING_GENERATION_KEY)? {
      info!(generation = generation.tag(), "Restored waiting generation");
      self.waiting = Some(generation);
      self.state = LifecycleState::Waiting;
    }

    Ok(current)
  }

  fn recorded(&self, key: &str) -> Result<Option<Generation>, LifecycleError> {
    let Some(tag) = self.registry.load_meta(key)? else {
      return Ok(None);
    };

    let generation = Generation::new(self.prefix.clone(), tag);
    if self.registry.lookup(&generation.static_store())?.is_none() {
      warn!(
        generation = generation.tag(),
        key,
        "Recorded generation has no static store, ignoring it"
      );
      return Ok(None);
    }
    Ok(Some(generation))
  }

  /// Pre-warm `generation`'s static store with every manifest entry.
  ///
  /// Every asset is fetched before anything is written, so a failed fetch
  /// leaves no trace of the new generation and the previous one keeps
  /// serving.
  pub async fn install(&mut self, generation: Generation) -> Result<InstallReport, LifecycleError> {
    let prior = self.state;
    self.state = LifecycleState::Installing;
    info!(generation = generation.tag(), "Installing generation");

    match self.populate(&generation).await {
      Ok(assets) => {
        self.waiting = Some(generation.clone());
        self.state = LifecycleState::Waiting;
        if let Err(e) = self.registry.save_meta(WAITING_GENERATION_KEY, generation.tag()) {
          warn!(error = %e, "Failed to persist waiting generation");
        }
        info!(generation = generation.tag(), assets, "Generation installed");
        Ok(InstallReport { generation, assets })
      }
      Err(e) => {
        self.state = prior;
        error!(generation = generation.tag(), error = %e, "Cache installation failed");
        Err(e)
      }
    }
  }

  async fn populate(&mut self, generation: &Generation) -> Result<usize, LifecycleError> {
    let assets = self.prefetch(generation).await?;

    let name = generation.static_store();
    let existed = self.registry.lookup(&name)?.is_some();
    let store = self.registry.open(&name)?;

    for (request, response) in &assets {
      if let Err(e) = store.put(request, response) {
        if !existed {
          self.registry.delete(&name)?;
        }
        return Err(e.into());
      }
    }

    // A complete install replaces whatever was waiting before it
    let current = self.descriptor.current().await;
    if let Some(superseded) = self.waiting.take() {
      if &superseded != generation && current.as_ref() != Some(&superseded) {
        info!(generation = superseded.tag(), "Discarding superseded waiting generation");
        for store in [superseded.static_store(), superseded.api_store()] {
          if let Err(e) = self.registry.delete(&store) {
            warn!(store = %store, error = %e, "Failed to delete superseded cache");
          }
        }
      }
    }

    Ok(assets.len())
  }

  async fn prefetch(
    &self,
    generation: &Generation,
  ) -> Result<Vec<(ProxyRequest, Response)>, LifecycleError> {
    let install_failure = |url: &str, reason: String| LifecycleError::InstallFailure {
      tag: generation.tag().to_string(),
      url: url.to_string(),
      reason,
    };

    let requests = self
      .manifest
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(ProxyRequest::get)
          .map_err(|e| install_failure(path, e.to_string()))
      })
      .collect::<Result<Vec<_>, _>>()?;

    let fetches = requests.into_iter().map(|request| {
      let fetcher = Arc::clone(&self.fetcher);
      async move {
        match fetcher.fetch(&request).await {
          Ok(response) if response.ok() => Ok((request, response)),
          Ok(response) => Err(install_failure(
            request.url.as_str(),
            format!("HTTP {}", response.status),
          )),
          Err(e) => Err(install_failure(request.url.as_str(), e.to_string())),
        }
      }
    });

    try_join_all(fetches).await
  }

  /// Make the waiting generation current and evict every other store.
  ///
  /// Running it again on an active generation only repeats the cleanup.
  pub async fn activate(&mut self) -> Result<ActivationReport, LifecycleError> {
    let target = match (self.state, &self.waiting) {
      (LifecycleState::Waiting, Some(generation)) => generation.clone(),
      (LifecycleState::Active, _) => self
        .descriptor
        .current()
        .await
        .ok_or(LifecycleError::NothingToActivate)?,
      _ => return Err(LifecycleError::NothingToActivate),
    };

    info!(generation = target.tag(), "Activating generation");

    let mut current = self.descriptor.write().await;
    let stores = self.registry.list_stores()?;

    *current = Some(target.clone());
    self.waiting = None;
    self.state = LifecycleState::Active;

    if let Err(e) = self.registry.save_meta(CURRENT_GENERATION_KEY, target.tag()) {
      warn!(error = %e, "Failed to persist current generation");
    }
    if let Err(e) = self.registry.delete_meta(WAITING_GENERATION_KEY) {
      warn!(error = %e, "Failed to clear waiting generation");
    }

    let mut evicted = Vec::new();
    for name in stores {
      if target.owns(&name) {
        continue;
      }
      match self.registry.delete(&name) {
        Ok(_) => {
          info!(store = %name, "Deleting old cache");
          evicted.push(name);
        }
        Err(e) => warn!(store = %name, error = %e, "Failed to delete old cache"),
      }
    }

    drop(current);

    Ok(ActivationReport {
      generation: target,
      evicted,
    })
  }
}
