//! Synthetic offline response.

use bytes::Bytes;
use serde::Serialize;

use crate::http::{Response, ResponseSource, ResponseType};

pub const OFFLINE_STATUS: u16 = 503;
pub const OFFLINE_ERROR: &str = "Network unavailable";
pub const OFFLINE_MESSAGE: &str = "You are currently offline. Please check your connection.";

#[derive(Serialize)]
struct OfflineBody<'a> {
  error: &'a str,
  message: &'a str,
}

/// Build the 503 JSON response served when neither network nor cache can
/// satisfy a request. A new response is built for every failure.
pub fn offline_response() -> Response {
  let body = serde_json::to_vec(&OfflineBody {
    error: OFFLINE_ERROR,
    message: OFFLINE_MESSAGE,
  })
  .unwrap_or_default();

  Response {
    status: OFFLINE_STATUS,
    status_text: "Service Unavailable".to_string(),
    headers: vec![("Content-Type".to_string(), "application/json".to_string())],
    body: Bytes::from(body),
    response_type: ResponseType::Default,
    source: ResponseSource::Offline,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_body_is_exact() {
    let response = offline_response();
    assert_eq!(response.status, 503);
    assert_eq!(response.status_text, "Service Unavailable");
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(
      response.text(),
      r#"{"error":"Network unavailable","message":"You are currently offline. Please check your connection."}"#
    );
  }
}
