//! Install and activate: building a cache generation and retiring old ones.

use std::sync::Arc;

use coderverse_net::{Request, Url};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::agent::OfflineAgent;
use crate::cache::{CacheEntry, CacheKey};
use crate::error::{Result, SwError};
use crate::event::{AgentEvent, EventReply, ExtendableLifetime};

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

/// Lifecycle bookkeeping for one agent instance.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    /// Current state.
    pub state: ServiceWorkerState,

    /// Set once the instance asked not to wait for older instances.
    pub skip_waiting: bool,

    /// Whether the last precache attempt produced a complete generation.
    pub cache_ready: bool,
}

impl Lifecycle {
    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

pub(crate) fn on_install(
    agent: &Arc<OfflineAgent>,
    _event: AgentEvent,
    lifetime: &ExtendableLifetime,
) -> EventReply {
    let agent = Arc::clone(agent);
    lifetime.wait_until(async move { agent.install().await });
    EventReply::Handled
}

pub(crate) fn on_activate(
    agent: &Arc<OfflineAgent>,
    _event: AgentEvent,
    lifetime: &ExtendableLifetime,
) -> EventReply {
    let agent = Arc::clone(agent);
    lifetime.wait_until(async move { agent.activate().await });
    EventReply::Handled
}

impl OfflineAgent {
    async fn set_state(&self, state: ServiceWorkerState) {
        debug!(version = %self.config.version, state = ?state, "Lifecycle state change");
        self.lifecycle.write().await.set_state(state);
    }

    /// Ask to be activated without waiting for older instances to go away.
    ///
    /// An instance already sitting in `Installed` is activated right away;
    /// one still installing keeps the flag and is activated by the host.
    pub async fn skip_waiting(&self) -> Result<()> {
        let waiting = {
            let mut lifecycle = self.lifecycle.write().await;
            lifecycle.skip_waiting = true;
            lifecycle.state == ServiceWorkerState::Installed
        };
        if waiting {
            info!(version = %self.config.version, "Skipping the wait, activating now");
            self.activate().await?;
        }
        Ok(())
    }

    /// Whether the current generation was fully populated.
    pub async fn cache_ready(&self) -> bool {
        self.lifecycle.read().await.cache_ready
    }

    /// Install: open the current generation and precache the manifest.
    ///
    /// A failed precache is logged and leaves the generation not ready; the
    /// install itself still completes.
    pub async fn install(&self) -> Result<()> {
        info!(version = %self.config.version, "Install event triggered");
        self.set_state(ServiceWorkerState::Installing).await;
        self.skip_waiting().await?;

        self.caches.open(&self.config.version).await?;

        let ready = match self.precache().await {
            Ok(count) => {
                info!(version = %self.config.version, count, "Precached manifest");
                true
            }
            Err(err) => {
                error!(version = %self.config.version, error = %err, "Cache population failed");
                false
            }
        };

        {
            let mut lifecycle = self.lifecycle.write().await;
            lifecycle.cache_ready = ready;
            lifecycle.set_state(ServiceWorkerState::Installed);
        }
        Ok(())
    }

    /// Fetch every manifest entry, then write them all to the current
    /// generation. Any failed fetch aborts the batch before anything is written.
    pub async fn precache(&self) -> Result<usize> {
        let fetched = try_join_all(self.manifest.iter().map(|url| self.fetch_for_precache(url)))
            .await?;
        let count = fetched.len();
        self.caches.put_all(&self.config.version, fetched).await?;
        Ok(count)
    }

    async fn fetch_for_precache(&self, url: &Url) -> Result<(CacheKey, CacheEntry)> {
        let request = Request::get(url.clone());
        let key = CacheKey::for_request(&request);
        let response = self.network.fetch(request).await?;
        if !response.ok() {
            return Err(SwError::InstallFailed(format!(
                "{url} responded with {}",
                response.status
            )));
        }
        let entry = CacheEntry::from_response(&key, response);
        Ok((key, entry))
    }

    /// Activate: delete stale generations and claim open clients.
    pub async fn activate(&self) -> Result<()> {
        info!(version = %self.config.version, "Activate event triggered");
        self.set_state(ServiceWorkerState::Activating).await;

        let (swept, claimed) = tokio::join!(self.delete_stale_generations(), self.clients.claim());
        swept?;
        claimed?;

        self.set_state(ServiceWorkerState::Activated).await;
        Ok(())
    }

    /// Delete every generation except the current one. Returns the deleted names.
    pub async fn delete_stale_generations(&self) -> Result<Vec<String>> {
        let stale: Vec<String> = self
            .caches
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != &self.config.version)
            .collect();

        try_join_all(stale.iter().map(|name| {
            info!(cache = %name, "Deleting old cache");
            self.caches.delete(name)
        }))
        .await?;

        Ok(stale)
    }

    /// Mark this instance as replaced.
    pub async fn retire(&self) {
        self.set_state(ServiceWorkerState::Redundant).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut lifecycle = Lifecycle::default();
        assert_eq!(lifecycle.state, ServiceWorkerState::Parsed);
        assert!(!lifecycle.is_active());

        lifecycle.set_state(ServiceWorkerState::Installing);
        assert_eq!(lifecycle.state, ServiceWorkerState::Installing);

        lifecycle.set_state(ServiceWorkerState::Activated);
        assert!(lifecycle.is_active());
    }
}
