//! File watcher for vault changes.
//!
//! Uses notify-debouncer-full, which pairs the two halves of a rename so a
//! move arrives as a single event carrying both paths.

use mirror_core::FileEvent;
use mirror_core::fs::{is_managed, is_managed_folder};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};
use walkdir::WalkDir;

/// Quiet period before buffered events are delivered.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to watch vault: {0}")]
    Notify(#[from] notify::Error),
}

/// File watcher that monitors the vault directory.
pub struct FileWatcher {
    /// Vault base path
    vault_path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    /// Receiver for file events
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

/// Track last seen mtime to filter spurious modify events (Docker volume bug workaround)
type MtimeCache = Arc<Mutex<HashMap<String, SystemTime>>>;

impl FileWatcher {
    /// Start watching `vault_path` recursively.
    pub fn new(vault_path: PathBuf) -> Result<Self, WatchError> {
        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let vault_path = vault_path.canonicalize().unwrap_or(vault_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root = vault_path.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        for file_event in classify(&event.event, &root) {
                            if !passes_mtime_filter(&file_event, &root, &mtime_cache) {
                                continue;
                            }
                            debug!("File event: {:?}", file_event);
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        error!("File watcher error: {}", e);
                    }
                }
            }
        })?;

        debouncer.watch(&vault_path, RecursiveMode::Recursive)?;

        Ok(Self {
            vault_path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    /// Get the vault path.
    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }
}

/// Vault-relative path with `/` separators, if `path` is inside `root`.
pub fn relative_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?),
            _ => return None,
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Turn a raw notify event into lifecycle events for managed files.
///
/// Renames are kept when either side is managed; the dispatcher decides
/// what a rename across the managed boundary means. Folder renames and
/// arrivals are expanded into one event per file found below the folder.
/// A path that is gone and isn't a managed file may have been a folder, so
/// it becomes a folder delete.
pub fn classify(event: &notify::Event, root: &Path) -> Vec<FileEvent> {
    let Some(first) = event.paths.first() else {
        return Vec::new();
    };

    let events = match event.kind {
        EventKind::Create(CreateKind::Folder) => created_below(first, root),
        EventKind::Create(_) => relative_path(first, root)
            .map(FileEvent::created)
            .into_iter()
            .collect(),
        EventKind::Remove(RemoveKind::File) => relative_path(first, root)
            .map(FileEvent::deleted)
            .into_iter()
            .collect(),
        EventKind::Remove(RemoveKind::Folder) => relative_path(first, root)
            .map(FileEvent::folder_deleted)
            .into_iter()
            .collect(),
        EventKind::Remove(_) => gone(first, root),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let Some(to) = event.paths.get(1) else {
                return Vec::new();
            };
            match (relative_path(first, root), relative_path(to, root)) {
                (Some(from), Some(_)) if to.is_dir() => moved_folder(&from, to, root),
                (Some(from), Some(to)) => vec![FileEvent::renamed(from, to)],
                // Moved out of the vault
                (Some(_), None) => gone(first, root),
                // Moved in from elsewhere
                (None, Some(_)) => appeared(to, root),
                (None, None) => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => gone(first, root),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => appeared(first, root),
        // Unpaired rename halves (e.g. FSEvents): existence tells which side this is
        EventKind::Modify(ModifyKind::Name(_)) => {
            if first.exists() {
                appeared(first, root)
            } else {
                gone(first, root)
            }
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => {
            if first.is_file() {
                relative_path(first, root)
                    .map(FileEvent::modified)
                    .into_iter()
                    .collect()
            } else if first.exists() {
                Vec::new()
            } else {
                gone(first, root)
            }
        }
        _ => Vec::new(),
    };

    events.into_iter().filter(is_relevant).collect()
}

fn is_relevant(event: &FileEvent) -> bool {
    match event {
        FileEvent::Renamed { from, to } => is_managed(from) || is_managed(to),
        FileEvent::Created { path } | FileEvent::Modified { path } | FileEvent::Deleted { path } => {
            is_managed(path)
        }
        FileEvent::FolderDeleted { path } => is_managed_folder(path),
    }
}

/// Events for something that now exists at `path`: a file, or every file below a folder.
fn appeared(path: &Path, root: &Path) -> Vec<FileEvent> {
    if path.is_dir() {
        return created_below(path, root);
    }
    relative_path(path, root)
        .map(FileEvent::created)
        .into_iter()
        .collect()
}

fn created_below(dir: &Path, root: &Path) -> Vec<FileEvent> {
    let Some(relative) = relative_path(dir, root) else {
        return Vec::new();
    };
    files_below(dir)
        .into_iter()
        .map(|inner| FileEvent::created(format!("{relative}/{inner}")))
        .collect()
}

/// Event for something no longer at `path`. Its kind can't be checked anymore.
fn gone(path: &Path, root: &Path) -> Vec<FileEvent> {
    match relative_path(path, root) {
        Some(relative) if is_managed(&relative) => vec![FileEvent::deleted(relative)],
        Some(relative) => vec![FileEvent::folder_deleted(relative)],
        None => Vec::new(),
    }
}

/// One rename per file below a folder that moved from `from` to `to`.
fn moved_folder(from: &str, to: &Path, root: &Path) -> Vec<FileEvent> {
    let Some(to_relative) = relative_path(to, root) else {
        return Vec::new();
    };
    files_below(to)
        .into_iter()
        .map(|inner| FileEvent::renamed(format!("{from}/{inner}"), format!("{to_relative}/{inner}")))
        .collect()
}

/// Files below `dir` as `/`-separated paths relative to it, skipping hidden folders.
fn files_below(dir: &Path) -> Vec<String> {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| relative_path(entry.path(), dir))
        .collect()
}

/// Drop modify events whose mtime didn't change, and keep the cache current.
///
/// Uses relative paths as keys so the cache is bounded by vault size.
fn passes_mtime_filter(event: &FileEvent, root: &Path, cache: &MtimeCache) -> bool {
    let mtime_of = |path: &str| {
        std::fs::metadata(root.join(path))
            .and_then(|m| m.modified())
            .ok()
    };
    let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());

    match event {
        FileEvent::Modified { path } => {
            let Some(mtime) = mtime_of(path) else {
                return true;
            };
            if cache.get(path) == Some(&mtime) {
                debug!("Skipping {} (mtime unchanged)", path);
                return false;
            }
            cache.insert(path.clone(), mtime);
        }
        FileEvent::Created { path } => {
            if let Some(mtime) = mtime_of(path) {
                cache.insert(path.clone(), mtime);
            }
        }
        FileEvent::Deleted { path } => {
            cache.remove(path);
        }
        FileEvent::Renamed { from, to } => {
            cache.remove(from);
            if let Some(mtime) = mtime_of(to) {
                cache.insert(to.clone(), mtime);
            }
        }
        FileEvent::FolderDeleted { path } => {
            let prefix = format!("{path}/");
            cache.retain(|known, _| !known.starts_with(&prefix));
        }
    }
    true
}
