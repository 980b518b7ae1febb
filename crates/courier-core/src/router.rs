//! Event router binding inbound events to state mutations.
//!
//! Handlers are keyed by event kind. A router is rebuilt on every successful
//! connection through [`EventRouter::rebind`], which drops every existing
//! binding before installing the new set, so a single inbound event reaches
//! each handler exactly once however many reconnects happened before it.

use courier_protocol::InboundEvent;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// A bound event handler.
pub type Handler<E, S> = Arc<dyn Fn(&E, &mut S) + Send + Sync>;

/// The event router.
pub struct EventRouter<E: InboundEvent, S> {
    /// Active bindings by event kind, in binding order.
    handlers: HashMap<E::Kind, Vec<Handler<E, S>>>,
    /// Caller-registered handlers re-applied after every rebind.
    observers: Vec<(E::Kind, Handler<E, S>)>,
    /// Number of completed rebinds.
    generation: u64,
}

impl<E: InboundEvent, S> EventRouter<E, S> {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            observers: Vec::new(),
            generation: 0,
        }
    }

    /// Bind a handler to an event kind until the next rebind.
    pub fn on<F>(&mut self, kind: E::Kind, handler: F)
    where
        F: Fn(&E, &mut S) + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    /// Bind a handler that is kept across rebinds.
    ///
    /// Observers run after the namespace handlers of the same kind.
    pub fn observe<F>(&mut self, kind: E::Kind, handler: F)
    where
        F: Fn(&E, &mut S) + Send + Sync + 'static,
    {
        let handler: Handler<E, S> = Arc::new(handler);
        self.handlers
            .entry(kind)
            .or_default()
            .push(Arc::clone(&handler));
        self.observers.push((kind, handler));
    }

    /// Remove every binding of an event kind, observers included.
    ///
    /// Returns the number of removed bindings.
    pub fn off(&mut self, kind: E::Kind) -> usize {
        self.observers.retain(|(k, _)| *k != kind);
        self.handlers.remove(&kind).map_or(0, |h| h.len())
    }

    /// Drop all bindings and install a fresh set.
    ///
    /// Observers are re-applied after `install` runs.
    pub fn rebind(&mut self, install: impl FnOnce(&mut Self)) {
        self.handlers.clear();
        install(self);

        for (kind, handler) in &self.observers {
            self.handlers
                .entry(*kind)
                .or_default()
                .push(Arc::clone(handler));
        }

        self.generation += 1;
        debug!(
            generation = self.generation,
            bindings = self.binding_count(),
            "Event handlers rebound"
        );
    }

    /// Run every handler bound to the event's kind.
    ///
    /// Returns the number of handlers that ran.
    pub fn dispatch(&self, event: &E, state: &mut S) -> usize {
        let Some(handlers) = self.handlers.get(&event.kind()) else {
            debug!(event = event.name(), "No handler bound");
            return 0;
        };

        for handler in handlers {
            handler(event, state);
        }

        trace!(event = event.name(), handlers = handlers.len(), "Dispatched");
        handlers.len()
    }

    /// Get the number of handlers bound to a kind.
    #[must_use]
    pub fn handler_count(&self, kind: E::Kind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Get the total number of bindings.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            bound_kinds: self.handlers.len(),
            bindings: self.binding_count(),
            observers: self.observers.len(),
            generation: self.generation,
        }
    }
}

impl<E: InboundEvent, S> Default for EventRouter<E, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: InboundEvent, S> fmt::Debug for EventRouter<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of kinds with at least one binding.
    pub bound_kinds: usize,
    /// Total number of bindings.
    pub bindings: usize,
    /// Number of observers kept across rebinds.
    pub observers: usize,
    /// Number of completed rebinds.
    pub generation: u64,
}
