//! The network side of the proxy: real HTTP and a permanently offline stand-in.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderName, HeaderValue};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::FetchError;
use crate::http::{ProxyRequest, Response, ResponseSource, ResponseType};

/// The network, as seen by the proxy.
#[async_trait]
pub trait Fetcher: Send + Sync {
  /// Perform the request. An `Err` means no response arrived at all; HTTP
  /// error statuses are successful fetches.
  async fn fetch(&self, request: &ProxyRequest) -> Result<Response, FetchError>;
}

/// HTTP client wrapper
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("swcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: config.origin.clone(),
    })
  }
}

/// Same-origin responses are `Basic`, everything else `Cors`.
fn response_type(origin: &Url, url: &Url) -> ResponseType {
  if url.origin() == origin.origin() {
    ResponseType::Basic
  } else {
    ResponseType::Cors
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &ProxyRequest) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
      ) else {
        debug!(header = %name, "Dropping malformed request header");
        continue;
      };
      builder = builder.header(name, value);
    }

    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::NetworkUnavailable(e.to_string()))?;

    let status = response.status();
    let response_type = response_type(&self.origin, response.url());
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::NetworkUnavailable(format!("Failed to read body: {}", e)))?;

    let response = Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
      response_type,
      source: ResponseSource::Network,
    };
    debug!(
      url = %request.url,
      status = response.status,
      content_type = response.header("content-type").unwrap_or_default(),
      "Fetched"
    );
    Ok(response)
  }
}

/// A network that is never there.
pub struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
  async fn fetch(&self, request: &ProxyRequest) -> Result<Response, FetchError> {
    Err(FetchError::NetworkUnavailable(format!(
      "offline mode, not fetching {}",
      request.url
    )))
  }
}
