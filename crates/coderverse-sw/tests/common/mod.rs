//! Shared fixtures: a scripted network and a fully wired agent.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coderverse_net::{same_origin, Fetcher, NetError, Request, Response, ResponseType, Url};
use coderverse_sw::{
    AgentConfig, AgentEvent, CacheKey, CacheStorage, ClientRegistry, EventDispatcher,
    FetchEvent, MemoryCacheStorage, NotificationCenter, OfflineAgent, Platform,
};
use hashbrown::HashMap;
use http::StatusCode;
use tokio::sync::Semaphore;

pub const ORIGIN: &str = "https://coderverse.test/";
pub const CDN_CSS: &str = "https://cdnjs.cloudflare.com/ajax/libs/tailwindcss/2.2.19/tailwind.min.css";

#[derive(Clone)]
enum Route {
    Respond {
        status: StatusCode,
        response_type: Option<ResponseType>,
        body: Vec<u8>,
    },
    Fail,
}

/// Network stand-in with per-URL canned responses.
///
/// Unknown URLs fail like a dropped connection. `hold` makes requests for a
/// URL wait until the returned semaphore gets a permit.
pub struct MockFetcher {
    origin: Url,
    routes: Mutex<HashMap<String, Route>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<String>>,
    offline: Mutex<bool>,
}

impl MockFetcher {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: Url::parse(origin).unwrap(),
            routes: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            offline: Mutex::new(false),
        }
    }

    fn absolute(&self, url: &str) -> String {
        self.origin.join(url).unwrap().to_string()
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
        self.routes.lock().unwrap().insert(
            self.absolute(url),
            Route::Respond {
                status: StatusCode::from_u16(status).unwrap(),
                response_type: None,
                body: body.as_bytes().to_vec(),
            },
        );
    }

    pub fn respond_typed(&self, url: &str, response_type: ResponseType, body: &str) {
        self.routes.lock().unwrap().insert(
            self.absolute(url),
            Route::Respond {
                status: StatusCode::OK,
                response_type: Some(response_type),
                body: body.as_bytes().to_vec(),
            },
        );
    }

    pub fn fail(&self, url: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(self.absolute(url), Route::Fail);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    pub fn hold(&self, url: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock()
            .unwrap()
            .insert(self.absolute(url), Arc::clone(&gate));
        gate
    }

    pub fn calls(&self, url: &str) -> usize {
        let url = self.absolute(url);
        self.calls.lock().unwrap().iter().filter(|c| **c == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());

        let gate = self.gates.lock().unwrap().get(&url).cloned();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| NetError::RequestFailed(e.to_string()))?;
            permit.forget();
        }

        if *self.offline.lock().unwrap() {
            return Err(NetError::RequestFailed("network is offline".into()));
        }

        let route = self.routes.lock().unwrap().get(&url).cloned();
        match route {
            Some(Route::Respond {
                status,
                response_type,
                body,
            }) => {
                let response_type = response_type.unwrap_or(if same_origin(&request.url, &self.origin) {
                    ResponseType::Basic
                } else {
                    ResponseType::Cors
                });
                Ok(Response::new(status, body)
                    .with_url(request.url.clone())
                    .with_type(response_type))
            }
            Some(Route::Fail) | None => Err(NetError::RequestFailed(format!(
                "connection refused: {url}"
            ))),
        }
    }
}

pub fn test_config(version: &str) -> AgentConfig {
    AgentConfig {
        version: version.to_string(),
        origin: Url::parse(ORIGIN).unwrap(),
        manifest: vec![
            "/".to_string(),
            "/index.html".to_string(),
            "/manifest.json".to_string(),
            "/coderverse.png".to_string(),
            "/coderverse.png".to_string(),
            CDN_CSS.to_string(),
        ],
        ..AgentConfig::default()
    }
}

/// Serve every manifest entry with a body derived from its path.
pub fn serve_manifest(network: &MockFetcher) {
    network.respond("/", 200, "<html>home</html>");
    network.respond("/index.html", 200, "<html>index</html>");
    network.respond("/manifest.json", 200, r#"{"name":"CoderVerse","version":"1.0.0"}"#);
    network.respond("/coderverse.png", 200, "PNG");
    network.respond(CDN_CSS, 200, ".tw{}");
}

pub struct Harness {
    pub agent: Arc<OfflineAgent>,
    pub dispatcher: EventDispatcher,
    pub caches: Arc<MemoryCacheStorage>,
    pub network: Arc<MockFetcher>,
    pub clients: Arc<ClientRegistry>,
    pub notifier: Arc<NotificationCenter>,
}

impl Harness {
    pub fn new(version: &str) -> Self {
        Self::with_caches(version, Arc::new(MemoryCacheStorage::new()))
    }

    pub fn with_caches(version: &str, caches: Arc<MemoryCacheStorage>) -> Self {
        let network = Arc::new(MockFetcher::new(ORIGIN));
        let clients = Arc::new(ClientRegistry::new(Url::parse(ORIGIN).unwrap()));
        let notifier = Arc::new(NotificationCenter::new());

        let agent = OfflineAgent::new(
            test_config(version),
            Platform {
                caches: caches.clone(),
                network: network.clone(),
                clients: clients.clone(),
                notifier: notifier.clone(),
            },
        )
        .unwrap();

        Self {
            dispatcher: EventDispatcher::new(Arc::clone(&agent)),
            agent,
            caches,
            network,
            clients,
            notifier,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    /// Install and activate with every manifest entry served.
    pub async fn install_and_activate(&self) {
        serve_manifest(&self.network);
        assert!(self.dispatcher.run(AgentEvent::Install).await.settled.is_ok());
        assert!(self.dispatcher.run(AgentEvent::Activate).await.settled.is_ok());
    }

    pub async fn cached_body(&self, path: &str) -> Option<Vec<u8>> {
        self.caches
            .match_request(self.agent.version(), &CacheKey::get(&self.url(path)))
            .await
            .unwrap()
            .map(|entry| entry.body)
    }

    pub async fn cached_keys(&self) -> Vec<CacheKey> {
        self.caches.entries(self.agent.version()).await.unwrap()
    }

    /// Run a fetch event to completion and return the response.
    pub async fn fetch(&self, request: Request) -> coderverse_sw::Result<Response> {
        self.dispatcher
            .run(AgentEvent::Fetch(FetchEvent::new(request)))
            .await
            .response
            .expect("request should be intercepted")
    }
}
