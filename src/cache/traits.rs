//! Core types for the caching system.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::{Response, ResponseSource, ResponseType};

/// Immutable snapshot of a response at the time it was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
  /// When the response was captured
  pub cached_at: DateTime<Utc>,
}

impl StoredResponse {
  /// Capture an independent copy of `response`.
  ///
  /// The caller keeps its own response untouched; the snapshot owns a
  /// separate copy of the body.
  pub fn capture(response: &Response) -> Self {
    Self {
      status: response.status,
      status_text: response.status_text.clone(),
      headers: response.headers.clone(),
      body: response.body.to_vec(),
      response_type: response.response_type,
      cached_at: Utc::now(),
    }
  }

  /// Turn the snapshot back into a response served from cache.
  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      status_text: self.status_text,
      headers: self.headers,
      body: Bytes::from(self.body),
      response_type: self.response_type,
      source: ResponseSource::Cache,
    }
  }
}
