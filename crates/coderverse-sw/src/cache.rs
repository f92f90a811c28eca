//! Cache generations: the platform cache store and an in-memory version of it.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache "coderverse-v1.0.0"
//!             └── CacheKey (GET https://…/index.html) → CacheEntry
//! ```

use async_trait::async_trait;
use coderverse_common::now_millis;
use coderverse_net::{Request, Response, ResponseType, Url};
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::{Result, SwError};

// ==================== Keys & Entries ====================

/// Request identity used as the cache key: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    /// Key for an arbitrary method and URL.
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Key for a request.
    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A cached response snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response type at the time it was stored.
    pub response_type: ResponseType,

    /// Response headers in arrival order. Repeated names keep every value;
    /// values are raw bytes.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response. Takes the response by value: pass a clone if the
    /// caller still needs to read the body.
    pub fn from_response(key: &CacheKey, response: Response) -> Self {
        let status = response.status.as_u16();
        let response_type = response.response_type;
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            url: key.url.clone(),
            status,
            response_type,
            headers,
            body: response.bytes().to_vec(),
            cached_at: now_millis(),
        }
    }

    /// First value of a header, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| std::str::from_utf8(value).ok())
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => trace!(header = %name, "Skipping unrepresentable cached header"),
            }
        }

        let mut response = Response::new(status, self.body.clone()).with_type(self.response_type);
        if let Ok(url) = Url::parse(&self.url) {
            response = response.with_url(url);
        }
        response.headers = headers;
        response
    }
}

// ==================== Cache Storage ====================

/// The platform cache store, addressed by generation name.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a generation, creating it if absent.
    async fn open(&self, name: &str) -> Result<()>;

    /// Check if a generation exists.
    async fn has(&self, name: &str) -> bool;

    /// Delete a generation. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// All generation names.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Look up an entry in one generation.
    async fn match_request(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Store an entry, replacing any entry with the same key.
    async fn put(&self, name: &str, key: CacheKey, entry: CacheEntry) -> Result<()>;

    /// Store a batch of entries; either all are written or none are.
    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, CacheEntry)>) -> Result<()>;

    /// Keys stored in one generation.
    async fn entries(&self, name: &str) -> Result<Vec<CacheKey>>;
}

/// A single generation.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add entry.
    pub fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&CacheKey> {
        self.entries.keys().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-memory [`CacheStorage`].
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a generation, `None` if it does not exist.
    pub async fn len(&self, name: &str) -> Option<usize> {
        self.caches.read().await.get(name).map(Cache::len)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(SwError::Cache("cache name must not be empty".to_string()));
        }
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        Ok(())
    }

    async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let removed = self.caches.write().await.remove(name).is_some();
        debug!(cache = %name, removed, "Cache deleted");
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn match_request(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let caches = self.caches.read().await;
        let entry = caches
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned();
        trace!(cache = %name, key = %key, hit = entry.is_some(), "Cache lookup");
        Ok(entry)
    }

    async fn put(&self, name: &str, key: CacheKey, entry: CacheEntry) -> Result<()> {
        self.open(name).await?;
        let mut caches = self.caches.write().await;
        let cache = caches
            .get_mut(name)
            .ok_or_else(|| SwError::Cache(format!("cache {name} vanished during put")))?;
        trace!(cache = %name, key = %key, "Cache put");
        cache.put(key, entry);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, CacheEntry)>) -> Result<()> {
        self.open(name).await?;
        let mut caches = self.caches.write().await;
        let cache = caches
            .get_mut(name)
            .ok_or_else(|| SwError::Cache(format!("cache {name} vanished during put_all")))?;
        for (key, entry) in entries {
            cache.put(key, entry);
        }
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheKey>> {
        let caches = self.caches.read().await;
        let mut keys: Vec<CacheKey> = caches
            .get(name)
            .map(|cache| cache.keys().into_iter().cloned().collect())
            .unwrap_or_default();
        keys.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.method.cmp(&b.method)));
        Ok(keys)
    }
}
