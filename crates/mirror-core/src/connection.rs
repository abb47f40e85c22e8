//! The engine's single connection slot.
//!
//! The handle is replaced wholesale whenever the configured URL changes and
//! is never mutated in place. Calls already holding an `Arc` to a superseded
//! client simply finish against it.

use crate::remote::{RemoteClient, Result};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

/// Builds a client for a deployment URL.
///
/// Construction must not perform network I/O; a bad URL is the only
/// expected failure.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, url: &str) -> Result<Arc<dyn RemoteClient>>;
}

/// Lifecycle of the connection slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No URL configured
    Unconfigured,
    /// A client is being built for a new URL
    Connecting,
    /// A client handle is available
    Ready,
    /// Construction failed; behaves like `Unconfigured` until the URL changes
    Failed(String),
}

struct Slot {
    url: String,
    state: ConnectionState,
    client: Option<Arc<dyn RemoteClient>>,
    generation: u64,
}

/// Owns the current client handle and the URL it was built from.
pub struct Connection {
    factory: Box<dyn ClientFactory>,
    slot: RwLock<Slot>,
}

impl Connection {
    /// Create an unconfigured slot.
    pub fn new(factory: impl ClientFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            slot: RwLock::new(Slot {
                url: String::new(),
                state: ConnectionState::Unconfigured,
                client: None,
                generation: 0,
            }),
        }
    }

    /// Discard the current handle and build one for `url`.
    ///
    /// An empty URL leaves the slot unconfigured. Returns the resulting state.
    pub fn replace(&self, url: &str) -> ConnectionState {
        let url = url.trim().to_string();
        let generation = {
            let mut slot = self.write();
            slot.client = None;
            slot.url = url.clone();
            slot.generation += 1;
            slot.state = if url.is_empty() {
                ConnectionState::Unconfigured
            } else {
                ConnectionState::Connecting
            };
            if url.is_empty() {
                info!("Remote URL cleared, syncing disabled");
                return slot.state.clone();
            }
            slot.generation
        };

        let built = self.factory.connect(&url);

        let mut slot = self.write();
        if slot.generation != generation {
            // A newer replace() won the race; leave its result alone
            debug!(
                "Dropping client #{} for {}, superseded by #{}",
                generation, url, slot.generation
            );
            return slot.state.clone();
        }
        match built {
            Ok(client) => {
                info!("Remote client #{} initialized for {}", generation, url);
                slot.client = Some(client);
                slot.state = ConnectionState::Ready;
            }
            Err(e) => {
                error!("Failed to initialize remote client: {}", e);
                slot.state = ConnectionState::Failed(e.to_string());
            }
        }
        slot.state.clone()
    }

    /// Current handle, if one is ready.
    pub fn get(&self) -> Option<Arc<dyn RemoteClient>> {
        self.read().client.clone()
    }

    /// URL the current handle was (or failed to be) built from.
    pub fn url(&self) -> String {
        self.read().url.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.read().state.clone()
    }

    /// Number of `replace` calls so far; the `#n` in client log lines.
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, StoreClient};
    use crate::store::InMemoryStore;

    struct TestFactory;

    impl ClientFactory for TestFactory {
        fn connect(&self, url: &str) -> Result<Arc<dyn RemoteClient>> {
            if url.starts_with("bad") {
                return Err(RemoteError::InvalidUrl(url.to_string()));
            }
            let client: Arc<dyn RemoteClient> = Arc::new(StoreClient::new(InMemoryStore::new()));
            Ok(client)
        }
    }

    #[test]
    fn test_starts_unconfigured() {
        let conn = Connection::new(TestFactory);
        assert_eq!(conn.state(), ConnectionState::Unconfigured);
        assert!(conn.get().is_none());
    }

    #[test]
    fn test_replace_with_url_becomes_ready() {
        let conn = Connection::new(TestFactory);
        assert_eq!(conn.replace("https://a.convex.cloud"), ConnectionState::Ready);
        assert!(conn.get().is_some());
        assert_eq!(conn.url(), "https://a.convex.cloud");
    }

    #[test]
    fn test_failed_construction_discards_prior_handle() {
        let conn = Connection::new(TestFactory);
        conn.replace("https://a.convex.cloud");
        assert!(conn.get().is_some());

        let state = conn.replace("bad-url");
        assert!(matches!(state, ConnectionState::Failed(_)));
        assert!(conn.get().is_none());
    }

    #[test]
    fn test_empty_url_unconfigures() {
        let conn = Connection::new(TestFactory);
        conn.replace("https://a.convex.cloud");

        assert_eq!(conn.replace("  "), ConnectionState::Unconfigured);
        assert!(conn.get().is_none());
    }

    #[test]
    fn test_replace_builds_new_handle_each_time() {
        let conn = Connection::new(TestFactory);
        conn.replace("https://a.convex.cloud");
        let first = conn.get().unwrap();
        conn.replace("https://a.convex.cloud");
        let second = conn.get().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(conn.generation(), 2);
    }
}
