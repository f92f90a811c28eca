//! Push payloads, notification descriptors and the notifier seam.

use async_trait::async_trait;
use coderverse_common::now_millis;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;

/// Values used for any field a push payload leaves out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub url: String,
    pub primary_key: String,
    pub require_interaction: bool,
    pub vibrate: Vec<u32>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "CoderVerse".to_string(),
            body: "New notification from CoderVerse".to_string(),
            icon: "/coderverse.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            tag: "coderverse-notification".to_string(),
            url: "/".to_string(),
            primary_key: "1".to_string(),
            require_interaction: false,
            vibrate: vec![200, 100, 200],
        }
    }
}

/// Push message body as sent by the push service. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: Option<String>,
    pub url: Option<String>,
    pub primary_key: Option<JsonValue>,
    pub require_interaction: Option<bool>,
    pub vibrate: Option<Vec<u32>>,
}

impl PushPayload {
    /// Parse push data. Missing data and anything that is not a JSON object
    /// yield an empty payload. Fields are read one by one: a field with the
    /// wrong type is dropped on its own and the rest are kept.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };
        let object = match serde_json::from_slice::<JsonValue>(data) {
            Ok(JsonValue::Object(object)) => object,
            Ok(other) => {
                warn!(kind = json_kind(&other), "Push data is not an object, using defaults");
                return Self::default();
            }
            Err(err) => {
                warn!(error = %err, "Failed to parse push data, using defaults");
                return Self::default();
            }
        };

        Self {
            title: text_field(&object, "title"),
            body: text_field(&object, "body"),
            icon: text_field(&object, "icon"),
            badge: text_field(&object, "badge"),
            tag: text_field(&object, "tag"),
            url: text_field(&object, "url"),
            primary_key: object.get("primaryKey").filter(|v| !v.is_null()).cloned(),
            require_interaction: typed_field(&object, "requireInteraction"),
            vibrate: typed_field(&object, "vibrate"),
        }
    }

    fn primary_key(&self) -> Option<String> {
        match self.primary_key {
            Some(JsonValue::String(ref s)) => Some(s.clone()),
            Some(JsonValue::Null) | None => None,
            Some(ref other) => Some(other.to_string()),
        }
    }
}

/// A non-empty string field; empty strings count as absent.
fn text_field(object: &JsonMap<String, JsonValue>, key: &str) -> Option<String> {
    typed_field::<String>(object, key).filter(|s| !s.is_empty())
}

fn typed_field<T: DeserializeOwned>(object: &JsonMap<String, JsonValue>, key: &str) -> Option<T> {
    let value = object.get(key).filter(|v| !v.is_null())?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            debug!(field = key, error = %err, "Ignoring malformed push field");
            None
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// A notification button.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// Everything needed to display one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub url: String,
    pub primary_key: String,
    pub require_interaction: bool,
    pub vibrate: Vec<u32>,
    pub silent: bool,
    pub actions: Vec<NotificationAction>,
    /// Arrival time (ms since epoch).
    pub timestamp: u64,
}

impl NotificationDescriptor {
    /// Merge a payload over the defaults; supplied values win.
    pub fn from_payload(payload: PushPayload, defaults: &NotificationDefaults) -> Self {
        let primary_key = payload
            .primary_key()
            .unwrap_or_else(|| defaults.primary_key.clone());

        Self {
            title: payload.title.unwrap_or_else(|| defaults.title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.body.clone()),
            icon: payload.icon.unwrap_or_else(|| defaults.icon.clone()),
            badge: payload.badge.unwrap_or_else(|| defaults.badge.clone()),
            tag: payload.tag.unwrap_or_else(|| defaults.tag.clone()),
            url: payload.url.unwrap_or_else(|| defaults.url.clone()),
            primary_key,
            require_interaction: payload
                .require_interaction
                .unwrap_or(defaults.require_interaction),
            vibrate: payload.vibrate.unwrap_or_else(|| defaults.vibrate.clone()),
            silent: false,
            actions: vec![
                NotificationAction {
                    action: "explore".to_string(),
                    title: "Open App".to_string(),
                    icon: defaults.icon.clone(),
                },
                NotificationAction {
                    action: "close".to_string(),
                    title: "Close".to_string(),
                    icon: defaults.badge.clone(),
                },
            ],
            timestamp: now_millis(),
        }
    }
}

/// What a notification click asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickAction {
    /// Default tap or an "open"-style button.
    Open,
    /// "close"/"dismiss": nothing beyond closing.
    Dismiss,
}

impl ClickAction {
    /// Unknown actions behave like a default tap.
    pub fn parse(action: Option<&str>) -> Self {
        match action {
            Some("close") | Some("dismiss") => Self::Dismiss,
            _ => Self::Open,
        }
    }
}

/// The platform notification surface.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Display a notification. One with the same tag is replaced.
    async fn show_notification(&self, notification: &NotificationDescriptor) -> Result<()>;

    /// Close the notification with this tag.
    async fn close_notification(&self, tag: &str) -> Result<()>;
}

/// In-memory [`Notifier`] that keeps what is on screen and what was shown.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    visible: RwLock<Vec<NotificationDescriptor>>,
    shown: RwLock<Vec<NotificationDescriptor>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications currently on screen.
    pub async fn visible(&self) -> Vec<NotificationDescriptor> {
        self.visible.read().await.clone()
    }

    /// Every notification displayed so far, in order.
    pub async fn history(&self) -> Vec<NotificationDescriptor> {
        self.shown.read().await.clone()
    }
}

#[async_trait]
impl Notifier for NotificationCenter {
    async fn show_notification(&self, notification: &NotificationDescriptor) -> Result<()> {
        debug!(title = %notification.title, tag = %notification.tag, "Showing notification");
        let mut visible = self.visible.write().await;
        visible.retain(|n| n.tag != notification.tag);
        visible.push(notification.clone());
        self.shown.write().await.push(notification.clone());
        Ok(())
    }

    async fn close_notification(&self, tag: &str) -> Result<()> {
        self.visible.write().await.retain(|n| n.tag != tag);
        Ok(())
    }
}
