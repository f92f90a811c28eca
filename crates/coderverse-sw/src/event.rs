//! Event dispatch and handler lifetime extension.
//!
//! ```text
//! EventDispatcher
//!     ├── EventKind → Handler table
//!     └── dispatch(event)
//!             ├── EventReply (pass through / handled / respond with future)
//!             └── ExtendableLifetime (work the event must outlive)
//! ```
//!
//! Handlers never spawn tracked work on their own: anything that must finish
//! before the event is considered settled goes through
//! [`ExtendableLifetime::wait_until`].

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use coderverse_net::Response;
use futures::future::{join_all, BoxFuture, FutureExt};
use hashbrown::HashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::agent::OfflineAgent;
use crate::error::{Result, SwError};
use crate::fetch::{self, FetchEvent};
use crate::lifecycle;
use crate::message::{self, MessageEvent};
use crate::relay::{self, NotificationClickEvent, PushEvent};
use crate::sync::{self, SyncEvent};

// ==================== Events ====================

/// Event kinds the agent reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
    Message,
    Sync,
    PeriodicSync,
}

/// An event delivered by the platform.
#[derive(Debug)]
pub enum AgentEvent {
    Install,
    Activate,
    Fetch(FetchEvent),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
    Message(MessageEvent),
    Sync(SyncEvent),
    PeriodicSync(SyncEvent),
}

impl AgentEvent {
    /// The table key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::Install => EventKind::Install,
            AgentEvent::Activate => EventKind::Activate,
            AgentEvent::Fetch(_) => EventKind::Fetch,
            AgentEvent::Push(_) => EventKind::Push,
            AgentEvent::NotificationClick(_) => EventKind::NotificationClick,
            AgentEvent::Message(_) => EventKind::Message,
            AgentEvent::Sync(_) => EventKind::Sync,
            AgentEvent::PeriodicSync(_) => EventKind::PeriodicSync,
        }
    }
}

// ==================== Lifetime ====================

/// Work an event has to outlive.
///
/// Cloning yields another handle on the same set, so futures that run after
/// the handler returned (a fetch response being built) can still register.
#[derive(Debug, Clone)]
pub struct ExtendableLifetime {
    kind: EventKind,
    pending: Arc<Mutex<Vec<Pending>>>,
}

/// One registered piece of work.
enum Pending {
    Running(JoinHandle<Result<()>>),
    /// Registered with no runtime current; started by `settle`.
    Deferred(BoxFuture<'static, Result<()>>),
}

impl std::fmt::Debug for Pending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pending::Running(_) => f.write_str("Running"),
            Pending::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

impl Pending {
    fn start(self) -> JoinHandle<Result<()>> {
        match self {
            Pending::Running(handle) => handle,
            Pending::Deferred(work) => tokio::spawn(work),
        }
    }
}

impl ExtendableLifetime {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start `work` and keep the event alive until it finishes.
    ///
    /// Work registered inside a Tokio runtime starts immediately. Outside one
    /// it is held and started when the lifetime is settled.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let pending = match Handle::try_current() {
            Ok(runtime) => Pending::Running(runtime.spawn(work)),
            Err(_) => {
                debug!(event = ?self.kind, "No runtime current, deferring extended work");
                Pending::Deferred(work.boxed())
            }
        };
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pending);
    }

    /// Number of registered, not yet awaited, pieces of work.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait for every registered piece of work, including work registered
    /// while waiting. Returns the first failure.
    pub async fn settle(self) -> Result<()> {
        let mut first_error = None;
        loop {
            let batch = std::mem::take(
                &mut *self
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                break;
            }

            for joined in join_all(batch.into_iter().map(Pending::start)).await {
                let outcome = joined.unwrap_or_else(|e| {
                    Err(SwError::State(format!("extended work did not finish: {e}")))
                });
                if let Err(err) = outcome {
                    debug!(event = ?self.kind, error = %err, "Extended work rejected");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// ==================== Dispatch ====================

/// What a handler did with its event.
pub enum EventReply {
    /// Handled; any async work is in the lifetime.
    Handled,
    /// Not intercepted; the platform performs its default behavior.
    PassThrough,
    /// Respond to a fetch with the result of this future.
    Respond(BoxFuture<'static, Result<Response>>),
}

impl std::fmt::Debug for EventReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventReply::Handled => f.write_str("Handled"),
            EventReply::PassThrough => f.write_str("PassThrough"),
            EventReply::Respond(_) => f.write_str("Respond(..)"),
        }
    }
}

/// Event handler signature.
pub type Handler = fn(&Arc<OfflineAgent>, AgentEvent, &ExtendableLifetime) -> EventReply;

/// A dispatched event, before its response and lifetime have been awaited.
#[derive(Debug)]
pub struct Dispatched {
    pub reply: EventReply,
    pub lifetime: ExtendableLifetime,
}

/// A fully settled event.
#[derive(Debug)]
pub struct EventOutcome {
    /// Response for intercepted fetches.
    pub response: Option<Result<Response>>,
    /// Whether the event was left to the platform default.
    pub passed_through: bool,
    /// Outcome of the extended work.
    pub settled: Result<()>,
}

/// Routes platform events to the agent's handlers.
pub struct EventDispatcher {
    agent: Arc<OfflineAgent>,
    handlers: HashMap<EventKind, Handler>,
}

impl EventDispatcher {
    /// Create a dispatcher with the agent's standard handler table.
    pub fn new(agent: Arc<OfflineAgent>) -> Self {
        let mut handlers: HashMap<EventKind, Handler> = HashMap::new();
        handlers.insert(EventKind::Install, lifecycle::on_install);
        handlers.insert(EventKind::Activate, lifecycle::on_activate);
        handlers.insert(EventKind::Fetch, fetch::on_fetch);
        handlers.insert(EventKind::Push, relay::on_push);
        handlers.insert(
            EventKind::NotificationClick,
            relay::on_notification_click,
        );
        handlers.insert(EventKind::Message, message::on_message);
        handlers.insert(EventKind::Sync, sync::on_sync);
        handlers.insert(EventKind::PeriodicSync, sync::on_sync);
        Self { agent, handlers }
    }

    /// The agent events are routed to.
    pub fn agent(&self) -> &Arc<OfflineAgent> {
        &self.agent
    }

    /// Replace the handler for one event kind.
    pub fn on(&mut self, kind: EventKind, handler: Handler) {
        self.handlers.insert(kind, handler);
    }

    /// Stop handling an event kind; it will pass through.
    pub fn off(&mut self, kind: EventKind) {
        self.handlers.remove(&kind);
    }

    /// Hand an event to its handler without awaiting anything.
    pub fn dispatch(&self, event: AgentEvent) -> Dispatched {
        let kind = event.kind();
        let lifetime = ExtendableLifetime::new(kind);
        let reply = match self.handlers.get(&kind) {
            Some(handler) => handler(&self.agent, event, &lifetime),
            None => {
                debug!(event = ?kind, "No handler registered");
                EventReply::PassThrough
            }
        };
        Dispatched { reply, lifetime }
    }

    /// Dispatch an event, await its response, then its extended lifetime.
    pub async fn run(&self, event: AgentEvent) -> EventOutcome {
        let Dispatched { reply, lifetime } = self.dispatch(event);

        let (response, passed_through) = match reply {
            EventReply::Respond(response) => {
                let response = response.await;
                if let Err(ref err) = response {
                    self.report_error(err);
                }
                (Some(response), false)
            }
            EventReply::PassThrough => (None, true),
            EventReply::Handled => (None, false),
        };

        let settled = lifetime.settle().await;
        if let Err(ref err) = settled {
            self.report_rejection(err);
        }

        EventOutcome {
            response,
            passed_through,
            settled,
        }
    }

    /// Log an error that escaped a handler.
    pub fn report_error(&self, err: &SwError) {
        error!(category = err.category(), error = %err, "Service worker error");
    }

    /// Log rejected extended work. Always marks the rejection as handled so
    /// the platform does not report it again.
    pub fn report_rejection(&self, err: &SwError) -> bool {
        warn!(category = err.category(), error = %err, "Unhandled rejection");
        true
    }
}
