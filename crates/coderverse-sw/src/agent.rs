//! The offline cache agent.

use std::sync::Arc;

use coderverse_net::{Fetcher, Url};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::cache::CacheStorage;
use crate::clients::{ClientType, Clients};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::lifecycle::{Lifecycle, ServiceWorkerState};
use crate::message::AgentBroadcast;
use crate::notification::Notifier;

/// The platform services an agent runs against.
#[derive(Clone)]
pub struct Platform {
    pub caches: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Fetcher>,
    pub clients: Arc<dyn Clients>,
    pub notifier: Arc<dyn Notifier>,
}

/// One deployed version of the offline cache agent.
pub struct OfflineAgent {
    pub(crate) config: AgentConfig,
    pub(crate) manifest: Vec<Url>,
    pub(crate) caches: Arc<dyn CacheStorage>,
    pub(crate) network: Arc<dyn Fetcher>,
    pub(crate) clients: Arc<dyn Clients>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) lifecycle: RwLock<Lifecycle>,
    /// Detached work (navigation refreshes) that is not tied to any event.
    pub(crate) background: TaskTracker,
}

impl OfflineAgent {
    /// Create an agent. Fails if the configuration does not validate.
    pub fn new(config: AgentConfig, platform: Platform) -> Result<Arc<Self>> {
        config.validate()?;
        let manifest = config.manifest_urls()?;

        info!(
            version = %config.version,
            origin = %config.origin,
            manifest = manifest.len(),
            "Offline agent created"
        );

        Ok(Arc::new(Self {
            config,
            manifest,
            caches: platform.caches,
            network: platform.network,
            clients: platform.clients,
            notifier: platform.notifier,
            lifecycle: RwLock::new(Lifecycle::default()),
            background: TaskTracker::new(),
        }))
    }

    /// Name of the current cache generation.
    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Resolved, de-duplicated precache list.
    pub fn manifest(&self) -> &[Url] {
        &self.manifest
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServiceWorkerState {
        self.lifecycle.read().await.state
    }

    /// Whether this instance asked to be activated without waiting.
    pub async fn wants_skip_waiting(&self) -> bool {
        self.lifecycle.read().await.skip_waiting
    }

    /// Wait for detached background work (navigation refreshes) to finish.
    pub async fn wait_for_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    /// Post a message to every window client. Returns how many received it.
    pub(crate) async fn broadcast(&self, message: &AgentBroadcast) -> Result<usize> {
        let payload: JsonValue = serde_json::to_value(message)?;
        let windows = self.clients.match_all(ClientType::Window).await;

        let mut delivered = 0;
        for client in &windows {
            match self.clients.post_message(&client.id, payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(client = %client.id, error = %err, "Broadcast failed"),
            }
        }
        Ok(delivered)
    }
}
