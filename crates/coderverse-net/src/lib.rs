//! # CoderVerse Net
//!
//! Request and response model plus the network fetcher used by the
//! CoderVerse offline agent.
//!
//! ## Design Goals
//!
//! 1. **Fetch-shaped types**: requests carry mode and destination, responses
//!    carry the `basic`/`cors`/`opaque` type the cache policy depends on
//! 2. **Single-read bodies**: reading a body consumes the response, so any
//!    copy meant for a cache has to be cloned first
//! 3. **Pluggable network**: the agent talks to a [`Fetcher`], with
//!    [`HttpFetcher`] as the `reqwest`-backed implementation

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use url::Url;

pub mod fetcher;

pub use fetcher::{FetcherConfig, HttpFetcher};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid body: {0}")]
    InvalidBody(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as set by the page that issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page load.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    /// `fetch()` / XHR and anything else without a destination.
    #[default]
    Empty,
}

/// Outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub destination: Destination,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::default(),
            destination: Destination::default(),
        }
    }

    /// Create a navigation request for a full page load.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: Destination::Document,
            ..Self::get(url)
        }
    }

    /// Parse a URL and create a GET request for it.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether this request loads a whole document.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate || self.destination == Destination::Document
    }
}

/// Response type, as exposed by the fetch model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response with full access to status and body.
    #[default]
    Basic,
    /// Cross-origin response permitted by CORS.
    Cors,
    /// Cross-origin response whose status and body are hidden.
    Opaque,
    /// Network error surfaced as a response.
    Error,
}

/// HTTP response.
///
/// The body can be read once: [`Response::bytes`] and friends take `self`.
/// Clone the response before reading it when a second copy is needed.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub response_type: ResponseType,
    pub headers: HeaderMap,
    pub redirected: bool,
    body: Bytes,
}

impl Response {
    /// Create a basic response with the given status and body.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            response_type: ResponseType::Basic,
            headers: HeaderMap::new(),
            redirected: false,
            body: body.into(),
        }
    }

    /// Create an HTML response.
    pub fn html(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status, body.into()).with_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )
    }

    /// Set the URL the response was served from.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the response may be written to a cache: a plain 200 with an
    /// inspectable (`basic`) body.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK && self.response_type == ResponseType::Basic
    }

    /// Parsed `Content-Type` header.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Body length in bytes.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Consume the response and return its body.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Consume the response and return its body as text.
    pub fn text(self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::InvalidBody(e.to_string()))
    }

    /// Consume the response and parse its body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::InvalidBody(e.to_string()))
    }
}

/// The network, as seen by the agent.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. `Err` means no response arrived at all; HTTP
    /// error statuses come back as `Ok`.
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://coderverse.app/app.js").unwrap();
        let request = Request::get(url.clone())
            .destination(Destination::Script)
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("*/*"),
            );

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.destination, Destination::Script);
        assert!(request.headers.contains_key("accept"));
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_navigation_request() {
        let request = Request::navigate(Url::parse("https://coderverse.app/").unwrap());
        assert!(request.is_navigation());
        assert_eq!(request.mode, RequestMode::Navigate);

        let document = Request::parse("https://coderverse.app/about")
            .unwrap()
            .destination(Destination::Document);
        assert!(document.is_navigation());
    }

    #[test]
    fn test_request_parse_rejects_garbage() {
        assert!(matches!(
            Request::parse("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_same_origin() {
        let a = Url::parse("https://coderverse.app/a").unwrap();
        let b = Url::parse("https://coderverse.app/b?x=1").unwrap();
        let c = Url::parse("https://cdnjs.cloudflare.com/a").unwrap();
        let d = Url::parse("http://coderverse.app/a").unwrap();
        assert!(same_origin(&a, &b));
        assert!(!same_origin(&a, &c));
        assert!(!same_origin(&a, &d));
    }

    #[test]
    fn test_cacheable_requires_ok_and_basic() {
        assert!(Response::new(StatusCode::OK, "x").is_cacheable());
        assert!(!Response::new(StatusCode::NOT_FOUND, "x").is_cacheable());
        assert!(!Response::new(StatusCode::NO_CONTENT, "").is_cacheable());
        assert!(!Response::new(StatusCode::OK, "x")
            .with_type(ResponseType::Opaque)
            .is_cacheable());
        assert!(!Response::new(StatusCode::OK, "x")
            .with_type(ResponseType::Cors)
            .is_cacheable());
    }

    #[test]
    fn test_clone_before_read_keeps_both_bodies() {
        let response = Response::html(StatusCode::OK, "<p>hi</p>");
        let copy = response.clone();

        assert_eq!(response.text().unwrap(), "<p>hi</p>");
        assert_eq!(&copy.bytes()[..], b"<p>hi</p>");
    }

    #[test]
    fn test_html_content_type() {
        let response = Response::html(StatusCode::OK, "");
        let mime = response.content_type().unwrap();
        assert_eq!(mime.type_(), mime::TEXT);
        assert_eq!(mime.subtype(), mime::HTML);
    }

    #[test]
    fn test_json_body() {
        let response = Response::new(StatusCode::OK, r#"{"name":"CoderVerse"}"#);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["name"], "CoderVerse");

        let broken = Response::new(StatusCode::OK, "{");
        assert!(matches!(
            broken.json::<serde_json::Value>(),
            Err(NetError::InvalidBody(_))
        ));
    }
}
