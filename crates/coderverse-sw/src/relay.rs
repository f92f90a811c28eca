//! Push and notification-click handling.

use std::sync::Arc;

use coderverse_net::{same_origin, Url};
use tracing::{debug, error, info, warn};

use crate::agent::OfflineAgent;
use crate::clients::ClientType;
use crate::error::Result;
use crate::event::{AgentEvent, EventReply, ExtendableLifetime};
use crate::message::AgentBroadcast;
use crate::notification::{ClickAction, NotificationDescriptor, PushPayload};

/// A push message from the push service.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    /// Raw payload, if the message carried one.
    pub data: Option<Vec<u8>>,
}

impl PushEvent {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    /// A push without payload.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The user interacted with a notification.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: NotificationDescriptor,
    /// Button pressed; `None` for a tap on the notification body.
    pub action: Option<String>,
}

pub(crate) fn on_push(
    agent: &Arc<OfflineAgent>,
    event: AgentEvent,
    lifetime: &ExtendableLifetime,
) -> EventReply {
    let AgentEvent::Push(event) = event else {
        return EventReply::Handled;
    };
    info!("Push event received");

    let agent = Arc::clone(agent);
    lifetime.wait_until(async move { agent.show_push(event.data.as_deref()).await });
    EventReply::Handled
}

pub(crate) fn on_notification_click(
    agent: &Arc<OfflineAgent>,
    event: AgentEvent,
    lifetime: &ExtendableLifetime,
) -> EventReply {
    let AgentEvent::NotificationClick(event) = event else {
        return EventReply::Handled;
    };

    let agent = Arc::clone(agent);
    lifetime.wait_until(async move { agent.handle_notification_click(event).await });
    EventReply::Handled
}

impl OfflineAgent {
    /// Build a notification from push data and display it. Display failures
    /// are logged, not returned.
    pub async fn show_push(&self, data: Option<&[u8]>) -> Result<()> {
        let payload = PushPayload::parse(data);
        let notification = NotificationDescriptor::from_payload(payload, &self.config.notification);

        if let Err(err) = self.notifier.show_notification(&notification).await {
            error!(title = %notification.title, error = %err, "Failed to show notification");
        }
        Ok(())
    }

    /// Close the notification and, unless dismissed, bring the app forward
    /// at the notification's URL.
    pub async fn handle_notification_click(&self, event: NotificationClickEvent) -> Result<()> {
        debug!(action = ?event.action, tag = %event.notification.tag, "Notification clicked");

        if let Err(err) = self.notifier.close_notification(&event.notification.tag).await {
            warn!(error = %err, "Failed to close notification");
        }

        if ClickAction::parse(event.action.as_deref()) == ClickAction::Dismiss {
            return Ok(());
        }

        let target = self
            .config
            .resolve(&event.notification.url)
            .unwrap_or_else(|_| self.config.origin.clone());

        if let Err(err) = self.focus_or_open(&target).await {
            error!(url = %target, error = %err, "Failed to handle notification click");
        }
        Ok(())
    }

    /// Reuse an open window of this origin, preferring one already at
    /// `target`; otherwise, or when that window cannot be focused, open a
    /// new one.
    async fn focus_or_open(&self, target: &Url) -> Result<()> {
        let windows = self.clients.match_all(ClientType::Window).await;
        let existing = windows
            .iter()
            .find(|client| &client.url == target)
            .or_else(|| {
                windows
                    .iter()
                    .find(|client| same_origin(&client.url, &self.config.origin))
            });

        if let Some(client) = existing {
            let message = serde_json::to_value(AgentBroadcast::NotificationClick {
                url: target.to_string(),
            })?;
            if let Err(err) = self.clients.post_message(&client.id, message).await {
                warn!(client = %client.id, error = %err, "Failed to notify window of click");
            }

            match self.clients.focus(&client.id).await {
                Ok(_) => {
                    debug!(client = %client.id, "Focused existing window");
                    return Ok(());
                }
                Err(err) => {
                    warn!(client = %client.id, error = %err, "Failed to focus window, opening a new one");
                }
            }
        }

        let opened = self.clients.open_window(target).await?;
        debug!(client = %opened.id, url = %target, "Opened new window");
        Ok(())
    }
}
