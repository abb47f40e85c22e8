//! mirror-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod console;
pub mod native_fs;
pub mod settings;
pub mod watcher;

// Re-export key types for convenience
pub use console::{Command, Console, Reply};
pub use native_fs::NativeFs;
pub use settings::{Settings, SettingsError, SettingsStore};
pub use watcher::{FileWatcher, WatchError};
