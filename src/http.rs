//! Request and response types flowing through the proxy.

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  /// Top-level document load (a navigation)
  Document,
  /// Anything else: scripts, images, XHR/fetch calls
  Other,
}

/// An intercepted outbound request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Bytes>,
  pub destination: Destination,
}

impl ProxyRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
      destination: Destination::Other,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A top-level document load.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  pub fn cache_key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Cache key of a request: method plus the absolute URL, query included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    // Fragments never reach the server, so they never distinguish entries.
    url.set_fragment(None);
    Self {
      method: method.as_str().to_string(),
      url: url.to_string(),
    }
  }

  /// SHA-256 hex digest, used as a stable fixed-length storage key.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Response tainting, as seen by the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response with readable body
  Cors,
  /// Cross-origin response the requester cannot inspect
  Opaque,
  /// Constructed locally, never touched the network
  Default,
}

/// Where a response handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Served from a cache store
  Cache,
  /// Cached shell document served for a failed navigation
  Shell,
  /// Synthetic offline fallback
  Offline,
}

/// A response travelling back to the requester.
///
/// The body is reference counted, so `clone()` is the explicit duplication
/// step that gives the cache and the caller independent copies.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub response_type: ResponseType,
  pub source: ResponseSource,
}

impl Response {
  /// Status in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn with_source(mut self, source: ResponseSource) -> Self {
    self.source = source;
    self
  }
}
