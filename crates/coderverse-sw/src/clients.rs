//! Client contexts (open tabs and windows) and an in-memory registry of them.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use coderverse_net::{same_origin, Url};
use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

use crate::error::{Result, SwError};

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    /// Matches every type in [`Clients::match_all`].
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Whether this agent controls the client.
    pub controlled: bool,
}

/// The platform's view of open client contexts.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Clients of the given type, controlled or not.
    async fn match_all(&self, client_type: ClientType) -> Vec<Client>;

    /// Get a client by ID.
    async fn get(&self, id: &str) -> Option<Client>;

    /// Take control of every in-scope client without a reload.
    async fn claim(&self) -> Result<()>;

    /// Open a new window at `url`.
    async fn open_window(&self, url: &Url) -> Result<Client>;

    /// Bring a window to the foreground.
    async fn focus(&self, id: &str) -> Result<Client>;

    /// Post a message to a client.
    async fn post_message(&self, id: &str, message: JsonValue) -> Result<()>;
}

struct ClientSlot {
    client: Client,
    inbox: Option<mpsc::UnboundedSender<JsonValue>>,
}

/// In-memory [`Clients`] implementation.
///
/// Pages added with [`ClientRegistry::connect`] get a receiver for the
/// messages the agent posts them. Windows opened by the agent have no
/// listener yet; messages to them are dropped.
pub struct ClientRegistry {
    scope: Url,
    clients: RwLock<HashMap<String, ClientSlot>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    /// Create a registry for an agent controlling `scope`.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> String {
        format!("client-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an already open, uncontrolled page.
    pub async fn connect(
        &self,
        url: Url,
        client_type: ClientType,
    ) -> (Client, mpsc::UnboundedReceiver<JsonValue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Client {
            id: self.next_id(),
            url,
            client_type,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controlled: false,
        };
        self.clients.write().await.insert(
            client.id.clone(),
            ClientSlot {
                client: client.clone(),
                inbox: Some(tx),
            },
        );
        (client, rx)
    }

    /// Remove a client (tab closed).
    pub async fn disconnect(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id).map(|slot| slot.client)
    }

    /// Number of clients this agent controls.
    pub async fn controlled_count(&self) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|slot| slot.client.controlled)
            .count()
    }
}

#[async_trait]
impl Clients for ClientRegistry {
    async fn match_all(&self, client_type: ClientType) -> Vec<Client> {
        let clients = self.clients.read().await;
        let mut matched: Vec<Client> = clients
            .values()
            .map(|slot| &slot.client)
            .filter(|c| client_type == ClientType::All || c.client_type == client_type)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).map(|slot| slot.client.clone())
    }

    async fn claim(&self) -> Result<()> {
        let mut clients = self.clients.write().await;
        let mut claimed = 0usize;
        for slot in clients.values_mut() {
            if same_origin(&slot.client.url, &self.scope)
                && slot.client.url.path().starts_with(self.scope.path())
            {
                slot.client.controlled = true;
                claimed += 1;
            }
        }
        debug!(claimed, "Clients claimed");
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> Result<Client> {
        let client = Client {
            id: self.next_id(),
            url: url.clone(),
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: true,
            controlled: same_origin(url, &self.scope),
        };

        let mut clients = self.clients.write().await;
        for slot in clients.values_mut() {
            slot.client.focused = false;
        }
        clients.insert(
            client.id.clone(),
            ClientSlot {
                client: client.clone(),
                inbox: None,
            },
        );
        debug!(url = %url, id = %client.id, "Window opened");
        Ok(client)
    }

    async fn focus(&self, id: &str) -> Result<Client> {
        let mut clients = self.clients.write().await;
        match clients.get(id) {
            None => return Err(SwError::Client(format!("no client with id {id}"))),
            Some(slot) if slot.client.client_type != ClientType::Window => {
                return Err(SwError::Client(
                    "Can only focus window clients".to_string(),
                ));
            }
            Some(_) => {}
        }

        let mut focused = None;
        for (client_id, slot) in clients.iter_mut() {
            slot.client.focused = client_id == id;
            if slot.client.focused {
                slot.client.visibility_state = VisibilityState::Visible;
                focused = Some(slot.client.clone());
            }
        }
        focused.ok_or_else(|| SwError::Client(format!("no client with id {id}")))
    }

    async fn post_message(&self, id: &str, message: JsonValue) -> Result<()> {
        let clients = self.clients.read().await;
        let slot = clients
            .get(id)
            .ok_or_else(|| SwError::Client(format!("no client with id {id}")))?;

        match slot.inbox {
            Some(ref inbox) => inbox
                .send(message)
                .map_err(|_| SwError::Client(format!("client {id} stopped listening"))),
            None => {
                trace!(id = %id, "Client has no listener, message dropped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(Url::parse("https://coderverse.app/").unwrap())
    }

    #[tokio::test]
    async fn test_open_window() {
        let clients = registry();
        let client = clients
            .open_window(&Url::parse("https://coderverse.app/lessons").unwrap())
            .await
            .unwrap();

        assert_eq!(client.client_type, ClientType::Window);
        assert!(client.focused);
        assert!(clients.get(&client.id).await.is_some());
    }

    #[tokio::test]
    async fn test_claim_only_in_scope() {
        let clients = registry();
        clients
            .connect(Url::parse("https://coderverse.app/").unwrap(), ClientType::Window)
            .await;
        clients
            .connect(Url::parse("https://other.app/").unwrap(), ClientType::Window)
            .await;

        assert_eq!(clients.controlled_count().await, 0);
        clients.claim().await.unwrap();
        assert_eq!(clients.controlled_count().await, 1);
    }

    #[tokio::test]
    async fn test_post_message_reaches_inbox() {
        let clients = registry();
        let (client, mut inbox) = clients
            .connect(Url::parse("https://coderverse.app/").unwrap(), ClientType::Window)
            .await;

        clients
            .post_message(&client.id, json!({"type": "PING"}))
            .await
            .unwrap();
        assert_eq!(inbox.try_recv().unwrap()["type"], "PING");
    }

    #[tokio::test]
    async fn test_post_message_unknown_client() {
        let clients = registry();
        assert!(matches!(
            clients.post_message("client-404", json!({})).await,
            Err(SwError::Client(_))
        ));
    }

    #[tokio::test]
    async fn test_focus_moves_between_windows() {
        let clients = registry();
        let (a, _rx_a) = clients
            .connect(Url::parse("https://coderverse.app/a").unwrap(), ClientType::Window)
            .await;
        let (b, _rx_b) = clients
            .connect(Url::parse("https://coderverse.app/b").unwrap(), ClientType::Window)
            .await;

        clients.focus(&a.id).await.unwrap();
        let focused = clients.focus(&b.id).await.unwrap();
        assert_eq!(focused.id, b.id);
        assert!(!clients.get(&a.id).await.unwrap().focused);
    }

    #[tokio::test]
    async fn test_focus_rejects_workers() {
        let clients = registry();
        let (worker, _rx) = clients
            .connect(Url::parse("https://coderverse.app/w.js").unwrap(), ClientType::Worker)
            .await;

        assert!(clients.focus(&worker.id).await.is_err());
        assert_eq!(clients.match_all(ClientType::Window).await.len(), 0);
        assert_eq!(clients.match_all(ClientType::All).await.len(), 1);
    }
}
