//! Push notification rendering and click routing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::NotificationConfig;

/// Inbound push payload. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  /// Number or string; kept as sent
  pub id: Option<Value>,
  pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: Value,
  pub url: String,
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

/// What a notification click should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
  /// Close the notification, then focus a window at `url` or open one
  FocusOrOpen { url: String },
  /// Close the notification only
  Close,
}

pub const VIEW_ACTION: &str = "view";
pub const DISMISS_ACTION: &str = "dismiss";

/// Where rendered notifications and click outcomes go.
#[async_trait]
pub trait NotificationSink: Send + Sync {
  async fn show(&self, notification: &Notification) -> color_eyre::Result<()>;
  async fn close(&self, notification: &Notification) -> color_eyre::Result<()>;
  async fn focus_or_open(&self, url: &str) -> color_eyre::Result<()>;
}

/// Sink that only writes to the log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
  async fn show(&self, notification: &Notification) -> color_eyre::Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      url = %notification.data.url,
      "Showing notification"
    );
    Ok(())
  }

  async fn close(&self, notification: &Notification) -> color_eyre::Result<()> {
    info!(title = %notification.title, "Closing notification");
    Ok(())
  }

  async fn focus_or_open(&self, url: &str) -> color_eyre::Result<()> {
    info!(url, "Opening window");
    Ok(())
  }
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.is_empty())
}

/// Parse a raw push body. Missing or unreadable bodies yield the empty
/// payload, so the notification still shows with defaults.
pub fn parse_payload(raw: Option<&[u8]>) -> PushPayload {
  match raw {
    None => PushPayload::default(),
    Some(bytes) => serde_json::from_slice(bytes).unwrap_or_else(|e| {
      warn!(error = %e, "Unreadable push payload, using defaults");
      PushPayload::default()
    }),
  }
}

/// Build the notification for a push, filling absent fields from `config`.
pub fn render(payload: PushPayload, config: &NotificationConfig, now: DateTime<Utc>) -> Notification {
  let primary_key = match payload.id {
    None | Some(Value::Null) => Value::from(1),
    Some(Value::String(s)) if s.is_empty() => Value::from(1),
    Some(id) => id,
  };

  let action = |action: &str, title: &str| NotificationAction {
    action: action.to_string(),
    title: title.to_string(),
    icon: config.icon.clone(),
  };

  Notification {
    title: non_empty(payload.title).unwrap_or_else(|| config.default_title.clone()),
    body: non_empty(payload.body).unwrap_or_else(|| config.default_body.clone()),
    icon: config.icon.clone(),
    badge: config.badge.clone(),
    vibrate: vec![100, 50, 100],
    data: NotificationData {
      date_of_arrival: now,
      primary_key,
      url: non_empty(payload.url).unwrap_or_else(|| config.default_url.clone()),
    },
    actions: vec![
      action(VIEW_ACTION, "View Details"),
      action(DISMISS_ACTION, "Dismiss"),
    ],
  }
}

/// Decide what a click on `notification` does.
pub fn route_click(notification: &Notification, action: Option<&str>, default_url: &str) -> ClickAction {
  if action != Some(VIEW_ACTION) {
    return ClickAction::Close;
  }

  let url = if notification.data.url.is_empty() {
    default_url.to_string()
  } else {
    notification.data.url.clone()
  };
  ClickAction::FocusOrOpen { url }
}

/// Carry out a click: the notification is always closed first.
pub async fn dispatch_click(
  sink: &dyn NotificationSink,
  notification: &Notification,
  action: Option<&str>,
  default_url: &str,
) -> color_eyre::Result<ClickAction> {
  sink.close(notification).await?;

  let outcome = route_click(notification, action, default_url);
  if let ClickAction::FocusOrOpen { url } = &outcome {
    sink.focus_or_open(url).await?;
  }
  Ok(outcome)
}
