//! DocumentStore trait: the remote store contract the engine relies on.
//!
//! Implementations:
//! - `InMemoryStore` - Reference implementation, used behind `StoreClient`
//!   in tests and for in-process mirroring
//! - The hosted deployment (reached through `ConvexHttpClient`)
//!
//! The store, not the engine, enforces that at most one live record exists
//! per path. `upsert_by_path` must be atomic per path.

use crate::document::{DocumentRecord, RecordId, now_millis};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Keyed record store with a uniqueness index on path.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Look up the live record for `path` through the path index.
    async fn get_by_path(&self, path: &str) -> Result<Option<DocumentRecord>>;

    /// All live records, in no particular order.
    async fn list_all(&self) -> Result<Vec<DocumentRecord>>;

    /// Replace content and timestamp of the record at `path`, or create it.
    async fn upsert_by_path(&self, path: &str, content: &str) -> Result<()>;

    /// Remove the record at `path` if there is one.
    async fn delete_by_path(&self, path: &str) -> Result<()>;
}

/// Record table plus path index, guarded together.
#[derive(Default)]
struct Tables {
    records: HashMap<RecordId, DocumentRecord>,
    by_path: HashMap<String, RecordId>,
    last_stamp: u64,
}

impl Tables {
    /// Next `updatedAt`, strictly greater than any previously assigned.
    fn next_stamp(&mut self) -> u64 {
        let stamp = now_millis().max(self.last_stamp + 1);
        self.last_stamp = stamp;
        stamp
    }
}

/// In-memory document store.
///
/// A single mutex covers both the records and the index, so the lookup and
/// the insert inside `upsert_by_path` can't interleave with another writer.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count records whose path equals `path`, bypassing the index.
    ///
    /// Used to verify the at-most-one invariant.
    pub fn count_path(&self, path: &str) -> usize {
        self.lock()
            .records
            .values()
            .filter(|r| r.path == path)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_by_path(&self, path: &str) -> Result<Option<DocumentRecord>> {
        let tables = self.lock();
        Ok(tables
            .by_path
            .get(path)
            .and_then(|id| tables.records.get(id))
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<DocumentRecord>> {
        Ok(self.lock().records.values().cloned().collect())
    }

    async fn upsert_by_path(&self, path: &str, content: &str) -> Result<()> {
        let mut tables = self.lock();
        let stamp = tables.next_stamp();

        if let Some(id) = tables.by_path.get(path).cloned() {
            let record = tables.records.get_mut(&id).ok_or_else(|| {
                StoreError::Backend(format!("Index points at missing record {id}"))
            })?;
            record.content = content.to_string();
            record.updated_at = stamp;
            return Ok(());
        }

        let id = RecordId::generate();
        tables.by_path.insert(path.to_string(), id.clone());
        tables.records.insert(
            id.clone(),
            DocumentRecord {
                id,
                path: path.to_string(),
                content: content.to_string(),
                updated_at: stamp,
            },
        );
        Ok(())
    }

    async fn delete_by_path(&self, path: &str) -> Result<()> {
        let mut tables = self.lock();
        if let Some(id) = tables.by_path.remove(path) {
            tables.records.remove(&id);
        }
        Ok(())
    }
}

// Lets a store be shared between a client and the test asserting on it
#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    async fn get_by_path(&self, path: &str) -> Result<Option<DocumentRecord>> {
        (**self).get_by_path(path).await
    }

    async fn list_all(&self) -> Result<Vec<DocumentRecord>> {
        (**self).list_all().await
    }

    async fn upsert_by_path(&self, path: &str, content: &str) -> Result<()> {
        (**self).upsert_by_path(path, content).await
    }

    async fn delete_by_path(&self, path: &str) -> Result<()> {
        (**self).delete_by_path(path).await
    }
}
