//! Messages between the agent and page contexts.
//!
//! ```text
//! page  ── {type: GET_VERSION} + port ──►  agent
//! page  ◄──────── {version} ──── port ───  agent
//! pages ◄── {type: BACKGROUND_SYNC_COMPLETE, …} ── agent (broadcast)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use coderverse_net::{NetError, Request};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::OfflineAgent;
use crate::error::{Result, SwError};
use crate::event::{AgentEvent, EventReply, ExtendableLifetime};

// ==================== Protocol ====================

/// Messages pages send to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    SkipWaiting,
    GetVersion,
    CacheUpdate,
    CheckUpdate,
}

impl InboundMessage {
    /// Parse message data; anything unrecognized yields `None`.
    pub fn parse(data: &JsonValue) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }
}

/// Reply to `GET_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
}

/// Messages the agent sends to pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentBroadcast {
    /// Reply to `CHECK_UPDATE`. `has_update` is always false: update
    /// detection is not implemented.
    #[serde(rename_all = "camelCase")]
    UpdateCheckResult {
        has_update: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        manifest: Option<JsonValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    BackgroundSyncComplete {
        timestamp: u64,
    },
    ContentSyncComplete {
        data: JsonValue,
    },
    NotificationClick {
        url: String,
    },
}

// ==================== Ports ====================

/// Unique identifier for a message port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(u64);

impl PortId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Sending end of a message channel, transferred to the agent with a message.
#[derive(Debug, Clone)]
pub struct MessagePort {
    pub id: PortId,
    tx: mpsc::UnboundedSender<JsonValue>,
}

impl MessagePort {
    /// Post a message.
    pub fn post_message(&self, message: JsonValue) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| SwError::Client("Entangled port is closed".to_string()))
    }
}

/// Receiving end kept by the page.
#[derive(Debug)]
pub struct PortReceiver {
    pub id: PortId,
    rx: mpsc::UnboundedReceiver<JsonValue>,
}

impl PortReceiver {
    /// Receive a message (non-blocking).
    pub fn try_receive(&mut self) -> Option<JsonValue> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next message; `None` once every sender is gone.
    pub async fn receive(&mut self) -> Option<JsonValue> {
        self.rx.recv().await
    }
}

/// A one-way reply channel: `port1` travels with the message, the page keeps
/// `port2`.
#[derive(Debug)]
pub struct MessageChannel {
    pub port1: MessagePort,
    pub port2: PortReceiver,
}

impl MessageChannel {
    /// Create a new message channel.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = PortId::new();
        Self {
            port1: MessagePort { id, tx },
            port2: PortReceiver { id, rx },
        }
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Events ====================

/// A message posted to the agent by a page.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: JsonValue,
    /// Sending client.
    pub source: Option<String>,
    /// Transferred ports; the first one is the reply channel.
    pub ports: Vec<MessagePort>,
}

impl MessageEvent {
    pub fn new(data: JsonValue) -> Self {
        Self {
            data,
            source: None,
            ports: Vec::new(),
        }
    }

    /// Set the sending client.
    pub fn from_client(mut self, client_id: impl Into<String>) -> Self {
        self.source = Some(client_id.into());
        self
    }

    /// Attach a reply port.
    pub fn with_port(mut self, port: MessagePort) -> Self {
        self.ports.push(port);
        self
    }

    fn reply_target(&self) -> ReplyTarget {
        match (self.ports.first(), self.source.as_ref()) {
            (Some(port), _) => ReplyTarget::Port(port.clone()),
            (None, Some(client)) => ReplyTarget::Client(client.clone()),
            (None, None) => ReplyTarget::Nobody,
        }
    }
}

/// Where a reply goes.
#[derive(Debug, Clone)]
enum ReplyTarget {
    Port(MessagePort),
    Client(String),
    Nobody,
}

pub(crate) fn on_message(
    agent: &Arc<OfflineAgent>,
    event: AgentEvent,
    lifetime: &ExtendableLifetime,
) -> EventReply {
    let AgentEvent::Message(event) = event else {
        return EventReply::Handled;
    };

    let Some(message) = InboundMessage::parse(&event.data) else {
        debug!(data = %event.data, "Ignoring unrecognized message");
        return EventReply::Handled;
    };
    info!(message = ?message, "Message received");

    let agent = Arc::clone(agent);
    let target = event.reply_target();
    match message {
        InboundMessage::SkipWaiting => {
            lifetime.wait_until(async move { agent.skip_waiting().await })
        }
        InboundMessage::GetVersion => lifetime.wait_until(async move {
            let reply = serde_json::to_value(VersionReply {
                version: agent.version().to_string(),
            })?;
            agent.reply(target, reply).await
        }),
        InboundMessage::CacheUpdate => {
            lifetime.wait_until(async move { agent.refresh_manifest_cache().await })
        }
        InboundMessage::CheckUpdate => lifetime.wait_until(async move {
            let result = serde_json::to_value(agent.check_for_update().await)?;
            agent.reply(target, result).await
        }),
    }
    EventReply::Handled
}

impl OfflineAgent {
    async fn reply(&self, target: ReplyTarget, message: JsonValue) -> Result<()> {
        match target {
            ReplyTarget::Port(port) => port.post_message(message),
            ReplyTarget::Client(id) => self.clients.post_message(&id, message).await,
            ReplyTarget::Nobody => {
                warn!("Message needs a reply but has neither port nor source");
                Ok(())
            }
        }
    }

    /// Re-populate the current generation from the manifest. Failures are
    /// logged; entries already present are overwritten, never duplicated.
    pub async fn refresh_manifest_cache(&self) -> Result<()> {
        self.caches.open(&self.config.version).await?;
        match self.precache().await {
            Ok(count) => info!(count, "Manual cache update complete"),
            Err(err) => warn!(error = %err, "Manual cache update failed"),
        }
        Ok(())
    }

    /// Fetch the web app manifest from the network and report it.
    pub async fn check_for_update(&self) -> AgentBroadcast {
        match self.fetch_manifest().await {
            Ok(manifest) => AgentBroadcast::UpdateCheckResult {
                has_update: false,
                manifest: Some(manifest),
                error: None,
            },
            Err(err) => {
                warn!(error = %err, "Update check failed");
                AgentBroadcast::UpdateCheckResult {
                    has_update: false,
                    manifest: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn fetch_manifest(&self) -> Result<JsonValue> {
        let url = self.config.resolve(&self.config.manifest_url)?;
        let request = Request::get(url.clone()).header(
            http::header::CACHE_CONTROL,
            http::HeaderValue::from_static("no-cache"),
        );

        let response = self.network.fetch(request).await?;
        if !response.ok() {
            return Err(NetError::RequestFailed(format!(
                "{url} responded with {}",
                response.status
            ))
            .into());
        }
        Ok(response.json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_inbound() {
        assert_eq!(
            InboundMessage::parse(&json!({"type": "SKIP_WAITING"})),
            Some(InboundMessage::SkipWaiting)
        );
        assert_eq!(
            InboundMessage::parse(&json!({"type": "GET_VERSION", "extra": 1})),
            Some(InboundMessage::GetVersion)
        );
        assert_eq!(InboundMessage::parse(&json!({"type": "REBOOT"})), None);
        assert_eq!(InboundMessage::parse(&json!("CACHE_UPDATE")), None);
        assert_eq!(InboundMessage::parse(&JsonValue::Null), None);
    }

    #[test]
    fn test_broadcast_wire_format() {
        let result = serde_json::to_value(AgentBroadcast::UpdateCheckResult {
            has_update: false,
            manifest: Some(json!({"name": "CoderVerse"})),
            error: None,
        })
        .unwrap();
        assert_eq!(
            result,
            json!({"type": "UPDATE_CHECK_RESULT", "hasUpdate": false, "manifest": {"name": "CoderVerse"}})
        );

        let click = serde_json::to_value(AgentBroadcast::NotificationClick { url: "/".into() }).unwrap();
        assert_eq!(click, json!({"type": "NOTIFICATION_CLICK", "url": "/"}));

        let sync = serde_json::to_value(AgentBroadcast::BackgroundSyncComplete { timestamp: 5 }).unwrap();
        assert_eq!(sync, json!({"type": "BACKGROUND_SYNC_COMPLETE", "timestamp": 5}));
    }

    #[test]
    fn test_version_reply_has_no_type() {
        let reply = serde_json::to_value(VersionReply {
            version: "coderverse-v1.0.0".into(),
        })
        .unwrap();
        assert_eq!(reply, json!({"version": "coderverse-v1.0.0"}));
    }

    #[tokio::test]
    async fn test_channel_delivers() {
        let MessageChannel { port1, mut port2 } = MessageChannel::new();
        port1.post_message(json!({"version": "v"})).unwrap();
        assert_eq!(port2.receive().await, Some(json!({"version": "v"})));
        assert!(port2.try_receive().is_none());
    }

    #[test]
    fn test_closed_port_errors() {
        let MessageChannel { port1, port2 } = MessageChannel::new();
        drop(port2);
        assert!(matches!(
            port1.post_message(json!({})),
            Err(SwError::Client(_))
        ));
    }
}
