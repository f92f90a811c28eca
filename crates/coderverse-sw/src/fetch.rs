//! Fetch interception: cache first, network fallback, background refresh
//! for documents, offline page when both fail.

use std::sync::Arc;

use coderverse_net::{Destination, Request, Response};
use http::{Method, StatusCode};
use tracing::{debug, error, trace, warn};

use crate::agent::OfflineAgent;
use crate::cache::{CacheEntry, CacheKey};
use crate::error::Result;
use crate::event::{AgentEvent, EventReply, ExtendableLifetime};

/// Markup served for navigations when neither the cache nor the network
/// can answer.
pub const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>CoderVerse - Offline</title>
  <style>
    body { font-family: system-ui, sans-serif; background: #0f172a; color: #e2e8f0;
           display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; }
    main { text-align: center; padding: 2rem; }
    button { margin-top: 1rem; padding: .6rem 1.4rem; border: 0; border-radius: .5rem;
             background: #6366f1; color: #fff; cursor: pointer; }
  </style>
</head>
<body>
  <main>
    <h1>You are offline</h1>
    <p>CoderVerse could not reach the network. Check your connection and try again.</p>
    <button onclick="location.reload()">Retry</button>
  </main>
</body>
</html>
"#;

/// A request intercepted from a client.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self { request }
    }
}

pub(crate) fn on_fetch(
    agent: &Arc<OfflineAgent>,
    event: AgentEvent,
    lifetime: &ExtendableLifetime,
) -> EventReply {
    let AgentEvent::Fetch(event) = event else {
        return EventReply::PassThrough;
    };

    if !agent.intercepts(&event.request) {
        trace!(url = %event.request.url, method = %event.request.method, "Not intercepted");
        return EventReply::PassThrough;
    }

    let agent = Arc::clone(agent);
    let lifetime = lifetime.clone();
    EventReply::Respond(Box::pin(async move {
        agent.respond(event.request, &lifetime).await
    }))
}

impl OfflineAgent {
    /// Whether a request is handled here rather than left to the network:
    /// GETs to the agent origin or an allow-listed origin.
    pub fn intercepts(&self, request: &Request) -> bool {
        request.method == Method::GET && self.config.is_allowed_origin(&request.url)
    }

    /// Whether a cacheable network response for `request` is kept.
    pub fn stores_at_runtime(&self, request: &Request) -> bool {
        request.is_navigation()
            || matches!(
                request.destination,
                Destination::Document | Destination::Script | Destination::Style | Destination::Image
            )
            || self.config.is_api_path(&request.url)
    }

    /// Produce the response for an intercepted request.
    pub async fn respond(
        self: &Arc<Self>,
        request: Request,
        lifetime: &ExtendableLifetime,
    ) -> Result<Response> {
        let key = CacheKey::for_request(&request);

        let cached = match self.caches.match_request(&self.config.version, &key).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(url = %request.url, error = %err, "Cache lookup failed");
                None
            }
        };

        if let Some(entry) = cached {
            debug!(url = %request.url, "Serving from cache");
            if request.is_navigation() {
                self.spawn_refresh(request, key);
            }
            return Ok(entry.to_response());
        }

        debug!(url = %request.url, "Fetching from network");
        match self.network.fetch(request.clone()).await {
            Ok(response) => {
                if response.is_cacheable() && self.stores_at_runtime(&request) {
                    let copy = response.clone();
                    let agent = Arc::clone(self);
                    lifetime.wait_until(async move { agent.store(key, copy).await });
                }
                Ok(response)
            }
            Err(err) => {
                error!(url = %request.url, error = %err, "Fetch failed");
                if request.is_navigation() {
                    Ok(self.offline_response().await)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    /// Write a response into the current generation.
    pub(crate) async fn store(&self, key: CacheKey, response: Response) -> Result<()> {
        let entry = CacheEntry::from_response(&key, response);
        self.caches
            .put(&self.config.version, key, entry)
            .await
            .inspect_err(|err| error!(error = %err, "Failed to cache response"))
    }

    /// Refresh a cached document without holding up the response already
    /// served. Failures are dropped.
    fn spawn_refresh(self: &Arc<Self>, request: Request, key: CacheKey) {
        let agent = Arc::clone(self);
        self.background.spawn(async move {
            let url = request.url.clone();
            match agent.network.fetch(request).await {
                Ok(fresh) if fresh.is_cacheable() => {
                    if agent.store(key, fresh).await.is_ok() {
                        debug!(url = %url, "Background refresh stored");
                    }
                }
                Ok(fresh) => {
                    trace!(url = %url, status = %fresh.status, "Background refresh not cacheable");
                }
                Err(err) => {
                    debug!(url = %url, error = %err, "Background refresh failed");
                }
            }
        });
    }

    /// First cached offline page, or the built-in one.
    pub async fn offline_response(&self) -> Response {
        for page in &self.config.offline_pages {
            let Ok(url) = self.config.resolve(page) else {
                continue;
            };
            if let Ok(Some(entry)) = self
                .caches
                .match_request(&self.config.version, &CacheKey::get(&url))
                .await
            {
                debug!(page = %url, "Serving cached offline page");
                return entry.to_response();
            }
        }

        warn!("No offline page cached, serving built-in page");
        Response::html(StatusCode::OK, OFFLINE_HTML)
    }
}
