//! FileSystem trait abstraction for reading the local document tree.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in mirror-daemon) - Uses tokio::fs
//!
//! Paths are vault-relative and use `/` as separator.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use thiserror::Error;
use tracing::warn;

/// Extension of the only managed document type.
pub const MANAGED_EXTENSION: &str = ".md";

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Platform-independent filesystem abstraction.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// List directory contents; `""` is the vault root
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Delete a file
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Read a file as text, replacing invalid UTF-8.
    async fn read_text(&self, path: &str) -> Result<String> {
        let bytes = self.read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Whether `path` is a document this system mirrors.
///
/// Only markdown files count, and nothing under a hidden segment
/// (`.mirror/`, `.obsidian/`, `.trash/`, dotfiles).
pub fn is_managed(path: &str) -> bool {
    path.ends_with(MANAGED_EXTENSION) && is_visible(path)
}

/// Whether `path` could be a folder holding managed documents.
pub fn is_managed_folder(path: &str) -> bool {
    !path.ends_with(MANAGED_EXTENSION) && is_visible(path)
}

fn is_visible(path: &str) -> bool {
    !path
        .split('/')
        .any(|segment| segment.is_empty() || segment.starts_with('.'))
}

/// Recursively collect every managed document path, sorted.
pub async fn collect_managed<F: FileSystem + ?Sized>(fs: &F) -> Result<Vec<String>> {
    let mut found = Vec::new();
    let mut pending = vec![String::new()];

    while let Some(dir) = pending.pop() {
        for entry in fs.list(&dir).await? {
            if entry.name.starts_with('.') {
                continue;
            }
            let path = if dir.is_empty() {
                entry.name
            } else {
                format!("{}/{}", dir, entry.name)
            };
            if entry.is_dir {
                pending.push(path);
            } else if is_managed(&path) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Read every managed document as `(path, content)`.
///
/// Files that disappear or fail to read mid-walk are skipped with a warning.
pub async fn load_managed<F: FileSystem + ?Sized>(fs: &F) -> Result<Vec<(String, String)>> {
    let mut documents = Vec::new();
    for path in collect_managed(fs).await? {
        match fs.read_text(&path).await {
            Ok(content) => documents.push((path, content)),
            Err(e) => warn!("Skipping {}: {}", path, e),
        }
    }
    Ok(documents)
}

/// In-memory filesystem for testing
#[derive(Default)]
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path, content.to_vec());
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize_path(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let mut file_names = BTreeSet::new();
        let mut dir_names = BTreeSet::new();

        for file_path in files.keys() {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dir_names.insert(dir.to_string());
                }
                None => {
                    file_names.insert(rest.to_string());
                }
            }
        }

        if !path.is_empty() && file_names.is_empty() && dir_names.is_empty() {
            return Err(FsError::NotFound(path));
        }

        let dirs = dir_names.into_iter().map(|name| FileEntry { name, is_dir: true });
        let plain = file_names.into_iter().map(|name| FileEntry { name, is_dir: false });
        Ok(dirs.chain(plain).collect())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files
            .remove(&path)
            .map(|_| ())
            .ok_or(FsError::NotFound(path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let prefix = format!("{}/", path);
        Ok(files.contains_key(&path) || files.keys().any(|k| k.starts_with(&prefix)))
    }
}

// Lets tests keep a handle on the filesystem they hand to a dispatcher
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }
}
