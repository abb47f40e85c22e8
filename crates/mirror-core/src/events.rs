//! Event infrastructure for mirror-core.
//!
//! `SyncEvent` carries user-visible notices and per-document results out of
//! the engine. `EventBus` fans them out to subscribers (the daemon prints
//! notices; tests count them).

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Message meant for the user, shown transiently by the host.
    Notice { message: String },
    /// Connection slot changed state after a URL change.
    ConnectionChanged {
        /// New state, e.g. "ready" or "failed".
        state: String,
        url: String,
    },
    /// A document was written to the remote store.
    DocumentSaved {
        path: String,
        /// Milliseconds since Unix epoch.
        timestamp: u64,
    },
    /// A document was removed from the remote store.
    DocumentDeleted {
        path: String,
        /// Milliseconds since Unix epoch.
        timestamp: u64,
    },
    /// A remote write failed.
    WriteFailed {
        /// "save" or "delete".
        operation: String,
        path: String,
        error: String,
    },
}

impl SyncEvent {
    pub fn notice(message: impl Into<String>) -> Self {
        SyncEvent::Notice {
            message: message.into(),
        }
    }
}

/// Keeps a listener registered on an `EventBus` while it is alive.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_listener(self.id);
        }
    }
}

type Listener = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Fan-out of engine events. Listeners run in registration order.
///
/// Subscribing needs the bus behind an `Arc`.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<BTreeMap<u64, Listener>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` until the returned `Subscription` is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(listener));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn remove_listener(&self, id: u64) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Deliver `event` to every listener.
    ///
    /// Listeners are called with no lock held, so they may subscribe or
    /// drop subscriptions themselves.
    pub fn emit(&self, event: SyncEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for listener in listeners {
            listener(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
