use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::io;
use thiserror::Error;

/// Subscription issued by the push service. Opaque to this crate and
/// forwarded to the backend as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PushSubscription(pub Value);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub user_visible_only: bool,
    pub application_server_key: Vec<u8>,
}

impl SubscribeOptions {
    pub fn user_visible(application_server_key: Vec<u8>) -> Self {
        Self {
            user_visible_only: true,
            application_server_key,
        }
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("No server public key stored")]
    MissingServerKey,
    #[error("Invalid push payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("Notification has no url to open")]
    MissingClickTarget,
    #[error("Failed to open {url}: {source}")]
    OpenWindow {
        url: String,
        #[source]
        source: io::Error,
    },
}

/// The platform push service.
pub trait PushManager: Send + Sync {
    fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> impl Future<Output = Result<PushSubscription, PushError>> + Send;
}

/// Where notifications are displayed and where clicks lead.
pub trait NotificationHost: Send + Sync {
    fn show_notification(&self, notification: &Notification) -> Result<(), PushError>;
    fn close_notification(&self, notification: &Notification);
    fn open_window(&self, url: &str) -> Result<(), PushError>;
}

/// Payload of a push message: `{"title": ..., "options": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    #[serde(default)]
    pub options: NotificationOptions,
}

impl Notification {
    pub fn from_push_data(text: &str) -> Result<Self, PushError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn click_url(&self) -> Option<&str> {
        self.options.data.as_ref()?.url.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NotificationData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Prints notifications to the terminal and opens click targets in the
/// default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotificationHost;

impl NotificationHost for ConsoleNotificationHost {
    fn show_notification(&self, notification: &Notification) -> Result<(), PushError> {
        tracing::info!(title = %notification.title, "Showing notification");
        match &notification.options.body {
            Some(body) => println!("{}\n  {}", notification.title, body),
            None => println!("{}", notification.title),
        }
        Ok(())
    }

    fn close_notification(&self, notification: &Notification) {
        tracing::debug!(title = %notification.title, "Notification closed");
    }

    fn open_window(&self, url: &str) -> Result<(), PushError> {
        open::that(url).map_err(|source| PushError::OpenWindow {
            url: url.to_string(),
            source,
        })
    }
}
