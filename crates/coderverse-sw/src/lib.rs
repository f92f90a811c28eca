//! # CoderVerse Offline Agent
//!
//! The service worker behind the CoderVerse web app: precaches the app
//! shell, answers requests from cache when the network is gone, keeps cached
//! pages fresh, and relays push notifications and page messages.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache), activate (drop old generations, claim clients)
//! - **Fetch interception**: cache first, network fallback, background refresh,
//!   offline page
//! - **Notifications**: push payloads to notifications, click routing
//! - **Messaging**: `SKIP_WAITING`, `GET_VERSION`, `CACHE_UPDATE`, `CHECK_UPDATE`
//! - **Sync**: `background-sync` and `content-sync` triggers
//!
//! ## Architecture
//!
//! ```text
//! EventDispatcher
//!     └── OfflineAgent (AgentConfig)
//!             ├── CacheStorage   (caches)
//!             ├── Fetcher        (network)
//!             ├── Clients        (open pages)
//!             └── Notifier       (system notifications)
//! ```
//!
//! The platform services are traits; `MemoryCacheStorage`, `ClientRegistry`
//! and `NotificationCenter` are in-memory implementations, and
//! `coderverse_net::HttpFetcher` talks to the real network.

pub mod agent;
pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod lifecycle;
pub mod message;
pub mod notification;
pub mod relay;
pub mod sync;

pub use agent::{OfflineAgent, Platform};
pub use cache::{Cache, CacheEntry, CacheKey, CacheStorage, MemoryCacheStorage};
pub use clients::{Client, ClientRegistry, ClientType, Clients, VisibilityState};
pub use config::AgentConfig;
pub use error::{Result, SwError};
pub use event::{
    AgentEvent, Dispatched, EventDispatcher, EventKind, EventOutcome, EventReply,
    ExtendableLifetime, Handler,
};
pub use fetch::{FetchEvent, OFFLINE_HTML};
pub use lifecycle::{Lifecycle, ServiceWorkerState};
pub use message::{
    AgentBroadcast, InboundMessage, MessageChannel, MessageEvent, MessagePort, PortReceiver,
    VersionReply,
};
pub use notification::{
    ClickAction, NotificationAction, NotificationCenter, NotificationDefaults,
    NotificationDescriptor, Notifier, PushPayload,
};
pub use relay::{NotificationClickEvent, PushEvent};
pub use sync::{SyncEvent, BACKGROUND_SYNC_TAG, CONTENT_SYNC_TAG};
