//! Event surface for observers of sync progress.
//!
//! Each engine owns one [`EventBus`]. Handlers run synchronously on the
//! task that emits, after the engine has applied the side effects the event
//! describes, and must not block.

use crate::state::SyncStatus;
use parking_lot::RwLock;
use plotsync_protocol::Operation;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Summary of one acknowledged batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Operations the server accepted in this batch.
    pub processed: usize,
    /// Local sync version after the batch.
    pub sync_version: u64,
    /// Server-reported errors for operations it did not accept.
    pub errors: Vec<String>,
}

/// An event emitted by the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The lifecycle status changed.
    StatusChanged {
        /// Status before the transition.
        previous: SyncStatus,
        /// Status after the transition.
        next: SyncStatus,
    },
    /// A batch was acknowledged and removed from the local queue.
    SyncCompleted(SyncSummary),
    /// A cycle failed in a way the caller should surface.
    SyncFailed {
        /// User-facing message.
        message: String,
        /// Underlying error detail.
        details: String,
    },
    /// Catch-up fetched operations the caller must fold into local state.
    ServerOperationsReceived {
        /// Server operations in server order.
        operations: Vec<Operation>,
        /// Version the operations bring the device to.
        sync_version: u64,
    },
}

impl SyncEvent {
    /// Returns the subscription key of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::StatusChanged { .. } => EventKind::StatusChanged,
            SyncEvent::SyncCompleted(_) => EventKind::SyncCompleted,
            SyncEvent::SyncFailed { .. } => EventKind::SyncFailed,
            SyncEvent::ServerOperationsReceived { .. } => EventKind::ServerOperationsReceived,
        }
    }
}

/// Subscription key for [`SyncEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`SyncEvent::StatusChanged`].
    StatusChanged,
    /// [`SyncEvent::SyncCompleted`].
    SyncCompleted,
    /// [`SyncEvent::SyncFailed`].
    SyncFailed,
    /// [`SyncEvent::ServerOperationsReceived`].
    ServerOperationsReceived,
}

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Registration {
    id: u64,
    kind: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    handlers: RwLock<Vec<Registration>>,
    channels: RwLock<Vec<UnboundedSender<SyncEvent>>>,
}

/// Per-engine observer registry.
#[derive(Default)]
pub struct EventBus {
    registry: Arc<Registry>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Registers a handler for every event.
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Returns a receiver of every future event.
    ///
    /// Dropping the receiver unsubscribes it on the next emit.
    pub fn subscribe_channel(&self) -> UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.channels.write().push(tx);
        rx
    }

    /// Delivers an event to every matching handler and channel.
    pub fn emit(&self, event: SyncEvent) {
        let kind = event.kind();
        // Snapshot so handlers may subscribe or unsubscribe re-entrantly.
        let handlers: Vec<Handler> = self
            .registry
            .handlers
            .read()
            .iter()
            .filter(|r| r.kind.is_none_or(|k| k == kind))
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in handlers {
            handler(&event);
        }

        let mut channels = self.registry.channels.write();
        channels.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.registry.handlers.read().len()
    }

    fn register(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .handlers
            .write()
            .push(Registration { id, kind, handler });
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .field("channels", &self.registry.channels.read().len())
            .finish()
    }
}

/// Handle returned by [`EventBus::on`]; call [`Subscription::unsubscribe`] to detach.
///
/// Dropping the handle keeps the handler registered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Removes the handler. A no-op if the bus is gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.handlers.write().retain(|r| r.id != self.id);
        }
    }
}
