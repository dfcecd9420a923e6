//! Request classification.
//!
//! Pure path matching, no I/O. The query string never affects the class of
//! a request (it only affects its cache key).

use reqwest::Method;
use std::collections::HashSet;

use crate::config::Config;
use crate::http::ProxyRequest;

/// How a request will be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
  /// Listed in the static-asset manifest; served cache-first
  StaticAsset { path: String },
  /// Whitelisted public GET endpoint; served stale-while-revalidate
  PublicApi { endpoint: String },
  /// Everything else, including every mutating call; network only
  Other,
}

/// Classification without the matched pattern, used to key routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
  StaticAsset,
  PublicApi,
  Other,
}

impl Classification {
  pub fn class(&self) -> RequestClass {
    match self {
      Self::StaticAsset { .. } => RequestClass::StaticAsset,
      Self::PublicApi { .. } => RequestClass::PublicApi,
      Self::Other => RequestClass::Other,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Classifier {
  static_assets: HashSet<String>,
  api_prefix: String,
  public_endpoints: Vec<String>,
}

impl Classifier {
  pub fn new(
    static_assets: impl IntoIterator<Item = String>,
    api_prefix: impl Into<String>,
    public_endpoints: impl IntoIterator<Item = String>,
  ) -> Self {
    Self {
      static_assets: static_assets.into_iter().collect(),
      api_prefix: api_prefix.into(),
      public_endpoints: public_endpoints.into_iter().collect(),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(
      config.static_assets.iter().cloned(),
      config.api.prefix.clone(),
      config.api.public_endpoints.iter().cloned(),
    )
  }

  pub fn classify(&self, request: &ProxyRequest) -> Classification {
    // Only safe reads are ever served from or written to a cache.
    if request.method != Method::GET {
      return Classification::Other;
    }

    let path = request.path();

    if self.static_assets.contains(path) {
      return Classification::StaticAsset {
        path: path.to_string(),
      };
    }

    if let Some(rest) = path.strip_prefix(self.api_prefix.as_str()) {
      if let Some(endpoint) = self
        .public_endpoints
        .iter()
        .find(|endpoint| is_endpoint(rest, endpoint))
      {
        return Classification::PublicApi {
          endpoint: endpoint.clone(),
        };
      }
    }

    Classification::Other
  }
}

/// `rest` names `endpoint` itself or something below it. Per-user paths
/// that merely end in a public name (`requests/42/stats`) stay private.
fn is_endpoint(rest: &str, endpoint: &str) -> bool {
  match rest.strip_prefix(endpoint.trim_matches('/')) {
    Some(tail) => tail.is_empty() || tail.starts_with('/'),
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn classifier() -> Classifier {
    Classifier::from_config(&Config::default())
  }

  fn get(path: &str) -> ProxyRequest {
    ProxyRequest::get(Url::parse("http://localhost:3000").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_manifest_entry_is_static() {
    let class = classifier().classify(&get("/icon-192.png"));
    assert_eq!(
      class,
      Classification::StaticAsset {
        path: "/icon-192.png".into()
      }
    );
  }

  #[test]
  fn test_static_match_is_exact() {
    assert_eq!(classifier().classify(&get("/icon-192.png.map")), Classification::Other);
    assert_eq!(classifier().classify(&get("/static/js/other.js")), Classification::Other);
  }

  #[test]
  fn test_query_string_ignored_for_matching() {
    let class = classifier().classify(&get("/api/stats?period=week"));
    assert_eq!(
      class,
      Classification::PublicApi {
        endpoint: "stats".into()
      }
    );

    let class = classifier().classify(&get("/manifest.json?v=3"));
    assert_eq!(class.class(), RequestClass::StaticAsset);
  }

  #[test]
  fn test_public_endpoint_needs_api_prefix() {
    assert_eq!(classifier().classify(&get("/stats")), Classification::Other);
    assert_eq!(
      classifier().classify(&get("/api/bank-info")).class(),
      RequestClass::PublicApi
    );
  }

  #[test]
  fn test_private_api_is_other() {
    assert_eq!(classifier().classify(&get("/api/requests/42")), Classification::Other);
  }

  #[test]
  fn test_public_endpoint_matches_whole_segments() {
    assert_eq!(
      classifier().classify(&get("/api/stats/week")).class(),
      RequestClass::PublicApi
    );
    for path in [
      "/api/requests/42/stats",
      "/api/admin/user-stats",
      "/api/my-bank-info-private",
      "/api/stats-private",
    ] {
      assert_eq!(classifier().classify(&get(path)), Classification::Other, "{}", path);
    }
  }

  #[test]
  fn test_mutating_calls_are_other() {
    let url = Url::parse("http://localhost:3000/api/stats").unwrap();
    for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH] {
      let request = ProxyRequest::new(method, url.clone());
      assert_eq!(classifier().classify(&request), Classification::Other);
    }

    let payment = ProxyRequest::new(
      Method::POST,
      Url::parse("http://localhost:3000/api/requests/42/payment").unwrap(),
    );
    assert_eq!(classifier().classify(&payment), Classification::Other);
  }

  #[test]
  fn test_post_to_static_path_is_other() {
    let request = ProxyRequest::new(
      Method::POST,
      Url::parse("http://localhost:3000/manifest.json").unwrap(),
    );
    assert_eq!(classifier().classify(&request), Classification::Other);
  }
}
