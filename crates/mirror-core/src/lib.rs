//! mirror-core: Keeps a local markdown tree mirrored into a remote document store.
//!
//! This crate provides:
//! - The document record and the store contract (one live record per path)
//! - Remote client abstraction with an HTTP implementation for deployments
//! - The sync engine mapping file lifecycle events to upserts and deletes
//! - Per-path ordered event dispatch and connectivity diagnostics
//! - FileSystem abstraction with an in-memory implementation for tests

pub mod connection;
pub mod diagnostics;
pub mod dispatch;
pub mod document;
pub mod engine;
pub mod events;
pub mod fs;
pub mod http;
pub mod remote;
pub mod store;

pub use connection::{ClientFactory, Connection, ConnectionState};
pub use diagnostics::{ConnectionReport, PROBE_TIMEOUT, UrlCheck};
pub use dispatch::{EventDispatcher, FileEvent};
pub use document::{DocumentRecord, RecordId};
pub use engine::{SyncEngine, SyncReport, WriteOutcome};
pub use events::{EventBus, Subscription, SyncEvent};
pub use fs::{FileEntry, FileSystem, InMemoryFs, is_managed, is_managed_folder};
pub use http::{ConvexHttpClient, HttpClientFactory};
pub use remote::{RemoteClient, RemoteError, StoreClient, StoreClientFactory};
pub use store::{DocumentStore, InMemoryStore, StoreError};
