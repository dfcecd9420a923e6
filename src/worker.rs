//! The proxy worker and its event surface.
//!
//! Fetch events may run concurrently; lifecycle events are serialized
//! behind one lock so install and activate never overlap.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::CacheRegistry;
use crate::classify::Classifier;
use crate::config::Config;
use crate::error::{LifecycleError, ProxyError};
use crate::fetch::Fetcher;
use crate::http::{ProxyRequest, Response};
use crate::lifecycle::{
  ActivationReport, Generation, GenerationDescriptor, InstallReport, LifecycleManager,
  LifecycleState,
};
use crate::notify::{self, ClickAction, Notification, NotificationSink};
use crate::pipeline::Pipeline;
use crate::strategy::StrategyExecutor;
use crate::tasks::TaskQueue;

pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

pub struct ProxyWorker {
  config: Config,
  registry: CacheRegistry,
  lifecycle: Mutex<LifecycleManager>,
  descriptor: GenerationDescriptor,
  pipeline: Pipeline,
  tasks: TaskQueue,
  sink: Arc<dyn NotificationSink>,
}

impl ProxyWorker {
  pub fn new(
    config: Config,
    registry: CacheRegistry,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn NotificationSink>,
  ) -> Result<Self, color_eyre::Report> {
    let lifecycle = LifecycleManager::new(&config, registry.clone(), Arc::clone(&fetcher));
    let descriptor = lifecycle.descriptor();
    let tasks = TaskQueue::new();

    let shell = ProxyRequest::get(config.resolve(&config.shell_path)?);
    let executor = StrategyExecutor::new(
      registry.clone(),
      descriptor.clone(),
      fetcher,
      tasks.clone(),
      shell,
    );
    let pipeline = Pipeline::for_strategies(Arc::new(Classifier::from_config(&config)), executor);
    debug!(routes = ?pipeline.route_names(), "Interception pipeline ready");

    Ok(Self {
      config,
      registry,
      lifecycle: Mutex::new(lifecycle),
      descriptor,
      pipeline,
      tasks,
      sink,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn registry(&self) -> &CacheRegistry {
    &self.registry
  }

  pub async fn current_generation(&self) -> Option<Generation> {
    self.descriptor.current().await
  }

  pub async fn state(&self) -> LifecycleState {
    self.lifecycle.lock().await.state()
  }

  /// Installed generation still waiting for activation.
  pub async fn waiting_generation(&self) -> Option<Generation> {
    self.lifecycle.lock().await.waiting().cloned()
  }

  /// Reload the generation a previous run left active.
  pub async fn restore(&self) -> Result<Option<Generation>, LifecycleError> {
    self.lifecycle.lock().await.restore().await
  }

  /// Install the configured generation, activating it straight away when
  /// `skip_waiting` is set.
  pub async fn install(&self) -> Result<(InstallReport, Option<ActivationReport>), LifecycleError> {
    let mut lifecycle = self.lifecycle.lock().await;
    let report = lifecycle.install(Generation::from_config(&self.config)).await?;

    let activation = if self.config.skip_waiting {
      debug!("Skip waiting");
      Some(lifecycle.activate().await?)
    } else {
      None
    };
    Ok((report, activation))
  }

  pub async fn activate(&self) -> Result<ActivationReport, LifecycleError> {
    self.lifecycle.lock().await.activate().await
  }

  /// Intercept one outbound request.
  pub async fn fetch(&self, request: ProxyRequest) -> Result<Response, ProxyError> {
    self.pipeline.dispatch(request).await
  }

  /// Render and show a push notification.
  pub async fn push(&self, raw: Option<&[u8]>) -> color_eyre::Result<Notification> {
    info!("Push received");
    let notification = notify::render(
      notify::parse_payload(raw),
      &self.config.notifications,
      Utc::now(),
    );
    self.sink.show(&notification).await?;
    Ok(notification)
  }

  pub async fn notification_click(
    &self,
    notification: &Notification,
    action: Option<&str>,
  ) -> color_eyre::Result<ClickAction> {
    info!(action = action.unwrap_or_default(), "Notification clicked");
    notify::dispatch_click(
      self.sink.as_ref(),
      notification,
      action,
      &self.config.notifications.default_url,
    )
    .await
  }

  /// Background sync. Returns whether the tag was handled.
  pub async fn sync(&self, tag: &str) -> bool {
    if tag != BACKGROUND_SYNC_TAG {
      debug!(tag, "Ignoring sync event");
      return false;
    }
    info!("Performing background sync");
    true
  }

  /// Wait for outstanding background revalidations.
  pub async fn settle(&self) {
    self.tasks.idle().await;
    debug!(
      spawned = self.tasks.spawned(),
      failed = self.tasks.failed(),
      "Background tasks settled"
    );
  }
}
