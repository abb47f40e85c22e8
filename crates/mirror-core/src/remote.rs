//! RemoteClient trait: typed calls against the remote document functions.
//!
//! Implementations:
//! - `ConvexHttpClient` - Deployment HTTP API via reqwest
//! - `StoreClient` - Wraps any `DocumentStore` in-process

use crate::connection::ClientFactory;
use crate::document::DocumentRecord;
use crate::store::{DocumentStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Function names exposed by the deployment's `documents` module.
pub mod functions {
    pub const LIST_DOCUMENTS: &str = "documents:listDocuments";
    pub const GET_DOCUMENT: &str = "documents:getDocument";
    pub const SAVE_DOCUMENT: &str = "documents:saveDocument";
    pub const DELETE_DOCUMENT: &str = "documents:deleteDocument";
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid deployment URL: {0}")]
    InvalidUrl(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Connection timed out ({}s)", .0.as_secs())]
    Timeout(Duration),
}

impl From<StoreError> for RemoteError {
    fn from(err: StoreError) -> Self {
        RemoteError::Server(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Connection to the remote document store.
///
/// Queries are read-only; mutations are the two write calls.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// `documents:listDocuments`
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>>;

    /// `documents:getDocument`
    async fn get_document(&self, path: &str) -> Result<Option<DocumentRecord>>;

    /// `documents:saveDocument`
    async fn save_document(&self, path: &str, content: &str) -> Result<()>;

    /// `documents:deleteDocument`
    async fn delete_document(&self, path: &str) -> Result<()>;
}

/// In-process client over a `DocumentStore`.
pub struct StoreClient<S> {
    store: S,
}

impl<S: DocumentStore> StoreClient<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: DocumentStore> RemoteClient for StoreClient<S> {
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        Ok(self.store.list_all().await?)
    }

    async fn get_document(&self, path: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.store.get_by_path(path).await?)
    }

    async fn save_document(&self, path: &str, content: &str) -> Result<()> {
        Ok(self.store.upsert_by_path(path, content).await?)
    }

    async fn delete_document(&self, path: &str) -> Result<()> {
        Ok(self.store.delete_by_path(path).await?)
    }
}

/// Connects every URL to the same shared store.
#[derive(Clone)]
pub struct StoreClientFactory {
    store: Arc<dyn DocumentStore>,
}

impl StoreClientFactory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

impl ClientFactory for StoreClientFactory {
    fn connect(&self, _url: &str) -> Result<Arc<dyn RemoteClient>> {
        let client: Arc<dyn RemoteClient> = Arc::new(StoreClient::new(Arc::clone(&self.store)));
        Ok(client)
    }
}
