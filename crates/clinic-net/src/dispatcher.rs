//! Routing of decoded push events to the handlers bound on a channel.
//!
//! Bindings are keyed by `(channel, EventKind)`. Several handlers may share
//! one key; each runs in isolation so an error or panic in one never stops
//! the others.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use clinic_shared::{ChannelName, EventKind, PushEvent};

/// A failure reported by an event handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

pub type Handler = Arc<dyn Fn(&PushEvent) -> Result<(), HandlerError> + Send + Sync>;

/// Handlers to bind on one channel, built fluently.
#[derive(Clone, Default)]
pub struct Handlers {
    bindings: Vec<(EventKind, Handler)>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&PushEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.bindings.push((kind, Arc::new(handler)));
        self
    }

    /// Bind the same handler under several event kinds.
    pub fn on_each<F>(mut self, kinds: &[EventKind], handler: F) -> Self
    where
        F: Fn(&PushEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        for kind in kinds {
            self.bindings.push((*kind, handler.clone()));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.bindings.iter().map(|(kind, _)| kind))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every bound handler ran; `failed` of them reported an error or panicked.
    Delivered { handled: usize, failed: usize },
    /// The channel is bound but nothing listens for this event kind.
    Ignored,
    /// The channel has no bindings (never subscribed or unsubscribed).
    NotSubscribed,
    /// The payload could not be decoded.
    Undecodable,
}

#[derive(Default)]
pub struct EventDispatcher {
    routes: HashMap<ChannelName, HashMap<EventKind, Vec<Handler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handlers` to the bindings of `channel`, keeping existing ones.
    pub fn bind(&mut self, channel: &ChannelName, handlers: Handlers) {
        let routes = self.routes.entry(channel.clone()).or_default();
        for (kind, handler) in handlers.bindings {
            routes.entry(kind).or_default().push(handler);
        }
    }

    /// Drop every binding of `channel`.
    pub fn unbind(&mut self, channel: &ChannelName) -> bool {
        self.routes.remove(channel).is_some()
    }

    pub fn is_bound(&self, channel: &ChannelName) -> bool {
        self.routes.contains_key(channel)
    }

    pub fn handler_count(&self, channel: &ChannelName, kind: EventKind) -> usize {
        self.routes
            .get(channel)
            .and_then(|routes| routes.get(&kind))
            .map_or(0, Vec::len)
    }

    /// Snapshot of the handlers bound to `(channel, kind)`.
    pub fn handlers_for(&self, channel: &ChannelName, kind: EventKind) -> Vec<Handler> {
        self.routes
            .get(channel)
            .and_then(|routes| routes.get(&kind))
            .cloned()
            .unwrap_or_default()
    }

    pub fn dispatch(&self, channel: &ChannelName, event: &PushEvent) -> DispatchOutcome {
        if !self.is_bound(channel) {
            return DispatchOutcome::NotSubscribed;
        }
        let handlers = self.handlers_for(channel, event.kind());
        if handlers.is_empty() {
            debug!(channel = %channel, event = event.kind().name(), "No handler bound, event ignored");
            return DispatchOutcome::Ignored;
        }
        invoke(&handlers, channel, event)
    }
}

/// Run `handlers` in order, isolating each one.
pub fn invoke(handlers: &[Handler], channel: &ChannelName, event: &PushEvent) -> DispatchOutcome {
    let mut failed = 0;
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed += 1;
                error!(channel = %channel, event = event.kind().name(), error = %e, "Event handler failed");
            }
            Err(_) => {
                failed += 1;
                error!(channel = %channel, event = event.kind().name(), "Event handler panicked");
            }
        }
    }
    DispatchOutcome::Delivered {
        handled: handlers.len(),
        failed,
    }
}
