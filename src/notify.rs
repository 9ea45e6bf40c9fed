//! Push notification pass-through.

use async_trait::async_trait;
use color_eyre::Result;
use serde::Deserialize;
use tracing::info;

const DEFAULT_BODY: &str = "You have a new notification.";
const DEFAULT_URL: &str = "/";

/// Inbound push payload after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
  pub title: String,
  pub body: String,
  /// Where a click should take the user
  pub url: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawPush {
  title: Option<String>,
  body: Option<String>,
  url: Option<String>,
}

impl PushMessage {
  /// Parse a push payload. Missing or malformed payloads fall back to defaults.
  pub fn parse(payload: Option<&[u8]>, app_name: &str) -> Self {
    let raw: RawPush = payload
      .and_then(|bytes| serde_json::from_slice(bytes).ok())
      .unwrap_or_default();

    Self {
      title: raw.title.unwrap_or_else(|| app_name.to_string()),
      body: raw.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
      url: raw.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
    }
  }
}

/// Renders notifications to the user.
#[async_trait]
pub trait NotificationSink: Send + Sync {
  async fn show(&self, message: &PushMessage) -> Result<()>;
}

/// Open client windows the user can be sent to.
#[async_trait]
pub trait ClientWindows: Send + Sync {
  /// Focus the first open window. Returns false when none is open.
  async fn focus_first(&self) -> Result<bool>;
  async fn open(&self, url: &str) -> Result<()>;
}

pub async fn handle_push(
  sink: &dyn NotificationSink,
  payload: Option<&[u8]>,
  app_name: &str,
) -> Result<PushMessage> {
  let message = PushMessage::parse(payload, app_name);
  sink.show(&message).await?;
  Ok(message)
}

/// Focus an existing window, or open one at the notification's URL.
pub async fn handle_click(windows: &dyn ClientWindows, message: &PushMessage) -> Result<()> {
  if windows.focus_first().await? {
    return Ok(());
  }
  windows.open(&message.url).await
}

/// Sink that writes notifications to the log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
  async fn show(&self, message: &PushMessage) -> Result<()> {
    info!(title = %message.title, body = %message.body, url = %message.url, "Notification");
    Ok(())
  }
}
