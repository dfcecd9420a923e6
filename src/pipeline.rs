//! Request interception pipeline.
//!
//! An ordered chain of `(predicate, handler)` routes. The first route whose
//! predicate accepts a request handles it; later routes never see it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::classify::{Classifier, RequestClass};
use crate::error::ProxyError;
use crate::http::{ProxyRequest, Response};
use crate::strategy::{Strategy, StrategyExecutor};

#[async_trait]
pub trait Handler: Send + Sync {
  async fn handle(&self, request: ProxyRequest) -> Result<Response, ProxyError>;
}

type Predicate = Box<dyn Fn(&ProxyRequest) -> bool + Send + Sync>;

struct Route {
  name: String,
  predicate: Predicate,
  handler: Arc<dyn Handler>,
}

#[derive(Default)]
pub struct Pipeline {
  routes: Vec<Route>,
}

impl Pipeline {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a route; routes are tried in registration order.
  pub fn route<P>(mut self, name: impl Into<String>, predicate: P, handler: Arc<dyn Handler>) -> Self
  where
    P: Fn(&ProxyRequest) -> bool + Send + Sync + 'static,
  {
    self.routes.push(Route {
      name: name.into(),
      predicate: Box::new(predicate),
      handler,
    });
    self
  }

  /// Route names in evaluation order.
  pub fn route_names(&self) -> Vec<&str> {
    self.routes.iter().map(|r| r.name.as_str()).collect()
  }

  pub async fn dispatch(&self, request: ProxyRequest) -> Result<Response, ProxyError> {
    let Some(route) = self.routes.iter().find(|r| (r.predicate)(&request)) else {
      return Err(ProxyError::Unrouted(request.cache_key().to_string()));
    };

    debug!(route = %route.name, method = %request.method, url = %request.url, "Intercepted request");
    route.handler.handle(request).await
  }

  /// The standard chain: one strategy route per request class.
  pub fn for_strategies(classifier: Arc<Classifier>, executor: StrategyExecutor) -> Self {
    [
      ("static-asset", RequestClass::StaticAsset),
      ("public-api", RequestClass::PublicApi),
      ("network", RequestClass::Other),
    ]
    .into_iter()
    .fold(Pipeline::new(), |pipeline, (name, class)| {
      let classifier = Arc::clone(&classifier);
      let handler = Arc::new(StrategyHandler::new(executor.clone(), class.into()));
      pipeline.route(
        name,
        move |request| classifier.classify(request).class() == class,
        handler,
      )
    })
  }
}

/// Runs one fixed strategy for every request routed to it.
pub struct StrategyHandler {
  executor: StrategyExecutor,
  strategy: Strategy,
}

impl StrategyHandler {
  pub fn new(executor: StrategyExecutor, strategy: Strategy) -> Self {
    Self { executor, strategy }
  }
}

#[async_trait]
impl Handler for StrategyHandler {
  async fn handle(&self, request: ProxyRequest) -> Result<Response, ProxyError> {
    self.executor.execute(self.strategy, request).await
  }
}
