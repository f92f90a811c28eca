//! Background and periodic sync triggers.

use std::sync::Arc;

use coderverse_common::now_millis;
use coderverse_net::Request;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::agent::OfflineAgent;
use crate::error::{Result, SwError};
use crate::event::{AgentEvent, EventReply, ExtendableLifetime};
use crate::message::AgentBroadcast;

/// One-off sync registered by pages when they go offline.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Periodic content refresh.
pub const CONTENT_SYNC_TAG: &str = "content-sync";

/// A sync trigger fired by the platform.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub tag: String,
}

impl SyncEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

/// Handles both one-off and periodic sync; the tag picks the work.
pub(crate) fn on_sync(
    agent: &Arc<OfflineAgent>,
    event: AgentEvent,
    lifetime: &ExtendableLifetime,
) -> EventReply {
    let event = match event {
        AgentEvent::Sync(event) | AgentEvent::PeriodicSync(event) => event,
        _ => return EventReply::Handled,
    };

    let agent = Arc::clone(agent);
    match event.tag.as_str() {
        BACKGROUND_SYNC_TAG => lifetime.wait_until(async move { agent.background_sync().await }),
        CONTENT_SYNC_TAG => lifetime.wait_until(async move { agent.content_sync().await }),
        other => debug!(tag = %other, "Ignoring unknown sync tag"),
    }
    EventReply::Handled
}

impl OfflineAgent {
    /// Background sync. There is nothing queued to replay yet, so this only
    /// tells open pages the sync ran.
    pub async fn background_sync(&self) -> Result<()> {
        info!("Background sync triggered");
        let delivered = self
            .broadcast(&AgentBroadcast::BackgroundSyncComplete {
                timestamp: now_millis(),
            })
            .await?;
        debug!(delivered, "Background sync complete");
        Ok(())
    }

    /// Fetch fresh content and hand it to every open page. Fails when the
    /// content cannot be fetched or parsed, so the platform retries later.
    pub async fn content_sync(&self) -> Result<()> {
        info!("Content sync triggered");
        let url = self.config.resolve(&self.config.content_sync_url)?;
        let response = self.network.fetch(Request::get(url.clone())).await?;
        if !response.ok() {
            return Err(SwError::SyncFailed(format!(
                "{url} responded with {}",
                response.status
            )));
        }

        let data: JsonValue = response.json()?;
        let delivered = self
            .broadcast(&AgentBroadcast::ContentSyncComplete { data })
            .await?;
        debug!(delivered, "Content sync complete");
        Ok(())
    }
}
