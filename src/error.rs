//! Error taxonomy for the proxy.
//!
//! A cache miss is not an error and is modelled as `Option::None` by the
//! registry. Everything else that can go wrong while serving a request or
//! moving between generations lands in one of the enums below.

use thiserror::Error;

/// A network fetch could not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),
}

/// A cache store operation failed. Callers fail open on these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
  #[error("cache storage error: {0}")]
  Storage(String),
  #[error("cache quota exceeded for store {store}")]
  QuotaExceeded { store: String },
  #[error("cache store {0} does not exist")]
  StoreMissing(String),
}

/// Errors raised by the lifecycle manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
  #[error("install of generation {tag} failed on {url}: {reason}")]
  InstallFailure {
    tag: String,
    url: String,
    reason: String,
  },
  #[error("no installed generation is waiting to be activated")]
  NothingToActivate,
  #[error(transparent)]
  Storage(#[from] CacheError),
}

/// Errors surfaced to the caller of the interception pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyError {
  /// The original network failure, propagated unchanged.
  #[error(transparent)]
  Network(#[from] FetchError),
  #[error("no route accepted request {0}")]
  Unrouted(String),
}
