//! Per-path ordered dispatch of file events.
//!
//! Each event runs as its own task, so slow network calls for one document
//! never hold up another. Events touching the same path are chained: a new
//! task first awaits the previous in-flight task for that path, which keeps
//! a modify followed by a delete from landing on the remote out of order.
//! A rename waits on both its old and its new path, and a folder delete
//! waits on everything below the folder.

use crate::engine::{SyncEngine, SyncReport};
use crate::events::SyncEvent;
use crate::fs::{self, FileSystem, FsError, is_managed, is_managed_folder};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

/// Lifecycle event for a file in the local tree.
///
/// Paths are vault-relative with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created { path: String },
    Modified { path: String },
    Deleted { path: String },
    Renamed { from: String, to: String },
    /// A whole folder left the tree; its files were not reported one by one
    FolderDeleted { path: String },
}

impl FileEvent {
    pub fn created(path: impl Into<String>) -> Self {
        FileEvent::Created { path: path.into() }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        FileEvent::Modified { path: path.into() }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        FileEvent::Deleted { path: path.into() }
    }

    pub fn renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        FileEvent::Renamed {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn folder_deleted(path: impl Into<String>) -> Self {
        FileEvent::FolderDeleted { path: path.into() }
    }
}

/// Remote work derived from one event, after filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Create(String),
    Modify(String),
    Delete(String),
    Rename { from: String, to: String },
    DeleteFolder(String),
}

impl Action {
    /// Map an event onto remote work, dropping unmanaged files.
    ///
    /// A rename across the managed boundary degrades to a plain delete or
    /// create on the managed side.
    fn classify(event: FileEvent) -> Option<Self> {
        match event {
            FileEvent::Created { path } => is_managed(&path).then_some(Action::Create(path)),
            FileEvent::Modified { path } => is_managed(&path).then_some(Action::Modify(path)),
            FileEvent::Deleted { path } => is_managed(&path).then_some(Action::Delete(path)),
            FileEvent::Renamed { from, to } => match (is_managed(&from), is_managed(&to)) {
                (true, true) => Some(Action::Rename { from, to }),
                (true, false) => Some(Action::Delete(from)),
                (false, true) => Some(Action::Create(to)),
                (false, false) => None,
            },
            FileEvent::FolderDeleted { path } => {
                is_managed_folder(&path).then_some(Action::DeleteFolder(path))
            }
        }
    }

    fn paths(&self) -> Vec<String> {
        match self {
            Action::Create(path)
            | Action::Modify(path)
            | Action::Delete(path)
            | Action::DeleteFolder(path) => vec![path.clone()],
            Action::Rename { from, to } => vec![from.clone(), to.clone()],
        }
    }
}

/// Whether work on `a` and work on `b` must not run concurrently.
///
/// Equal paths overlap, and so does a folder with anything below it.
fn overlaps(a: &str, b: &str) -> bool {
    let below = |inner: &str, outer: &str| {
        inner.len() > outer.len()
            && inner.starts_with(outer)
            && inner.as_bytes()[outer.len()] == b'/'
    };
    a == b || below(a, b) || below(b, a)
}

/// Completion handle for a dispatched event; cheap to clone and await.
pub type TaskHandle = Shared<BoxFuture<'static, ()>>;

/// Unfinished tasks by path, tagged with the id of the task that owns the entry.
type InFlight = Arc<Mutex<HashMap<String, (u64, TaskHandle)>>>;

/// Feeds file events to a `SyncEngine`, one ordered chain per path.
pub struct EventDispatcher<F> {
    engine: Arc<SyncEngine>,
    fs: Arc<F>,
    in_flight: InFlight,
    next_task: AtomicU64,
}

impl<F: FileSystem + 'static> EventDispatcher<F> {
    pub fn new(engine: Arc<SyncEngine>, fs: Arc<F>) -> Self {
        Self {
            engine,
            fs,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_task: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Schedule the remote work for `event`.
    ///
    /// Returns `None` for events about unmanaged files. Must be called from
    /// within a Tokio runtime. File content is read when the task runs, so a
    /// burst of modifies uploads the latest text.
    pub fn dispatch(&self, event: FileEvent) -> Option<TaskHandle> {
        let action = Action::classify(event)?;
        let keys = action.paths();
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);

        // Held until the new entries are in, so the task can't clear them first
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());

        let previous: Vec<TaskHandle> = in_flight
            .iter()
            .filter(|(path, _)| keys.iter().any(|key| overlaps(key, path)))
            .map(|(_, (_, handle))| handle.clone())
            .collect();

        let engine = Arc::clone(&self.engine);
        let fs = Arc::clone(&self.fs);
        let registry = Arc::clone(&self.in_flight);
        let owned_keys = keys.clone();
        let task = tokio::spawn(async move {
            for prev in previous {
                prev.await;
            }
            run(action, &engine, fs.as_ref()).await;

            let mut in_flight = registry.lock().unwrap_or_else(|e| e.into_inner());
            for key in owned_keys {
                if in_flight.get(&key).is_some_and(|(owner, _)| *owner == id) {
                    in_flight.remove(&key);
                }
            }
        });

        let handle: TaskHandle = async move {
            if let Err(e) = task.await {
                error!("Sync task failed: {}", e);
            }
        }
        .boxed()
        .shared();

        for key in keys {
            in_flight.insert(key, (id, handle.clone()));
        }
        Some(handle)
    }

    /// Wait for every task dispatched so far.
    pub async fn flush(&self) {
        let pending: Vec<TaskHandle> = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|(_, handle)| handle.clone())
            .collect();
        futures::future::join_all(pending).await;
    }

    /// Number of paths with an unfinished task.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Upload every managed document ("Sync Now").
    pub async fn sync_all(&self) -> SyncReport {
        match fs::load_managed(self.fs.as_ref()).await {
            Ok(documents) => self.engine.sync_all(documents).await,
            Err(e) => {
                error!("Failed to enumerate documents: {}", e);
                self.engine
                    .events()
                    .emit(SyncEvent::notice(format!("Sync failed: {e}")));
                SyncReport::default()
            }
        }
    }
}

async fn run<F: FileSystem + ?Sized>(action: Action, engine: &SyncEngine, fs: &F) {
    match action {
        Action::Create(path) => {
            if let Some(content) = read_current(fs, &path).await {
                engine.handle_create(&path, &content).await;
            }
        }
        Action::Modify(path) => {
            if let Some(content) = read_current(fs, &path).await {
                engine.handle_modify(&path, &content).await;
            }
        }
        Action::Delete(path) => {
            engine.handle_delete(&path).await;
        }
        Action::DeleteFolder(path) => {
            engine.handle_folder_delete(&path).await;
        }
        Action::Rename { from, to } => match read_current(fs, &to).await {
            Some(content) => {
                engine.handle_rename(&from, &to, &content).await;
            }
            None => {
                engine.handle_delete(&from).await;
            }
        },
    }
}

/// Read a file's content at execution time; `None` if it is gone.
async fn read_current<F: FileSystem + ?Sized>(fs: &F, path: &str) -> Option<String> {
    match fs.read_text(path).await {
        Ok(content) => Some(content),
        Err(FsError::NotFound(_)) => {
            debug!("{} vanished before it could be synced", path);
            None
        }
        Err(e) => {
            warn!("Failed to read {}: {}", path, e);
            None
        }
    }
}
