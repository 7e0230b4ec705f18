//! Local key-value storage for device state
//!
//! `FileStore` keeps a flat JSON object on disk and rewrites it atomically
//! (temp file + rename) on every `set`. A file that exists but cannot be read
//! or decoded is never overwritten. `MemoryStore` backs tests.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to encode store contents: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("refusing to overwrite unreadable store {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Minimal persistent map used for write-once, read-many device state
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// JSON-file backed store
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    /// Set when the file exists but could not be loaded; blocks writes
    unreadable: Option<String>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// A missing file starts empty and writable. Any other read or decode
    /// failure starts empty but read-only, so the existing file survives.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let (entries, unreadable) = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(map) => (map, None),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "store_corrupt_read_only");
                    (BTreeMap::new(), Some(e.to_string()))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (BTreeMap::new(), None),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "store_read_failed_read_only");
                (BTreeMap::new(), Some(e.to_string()))
            }
        };

        debug!(path = %path.display(), keys = entries.len(), "store_opened");
        Self { path, entries: Mutex::new(entries), unreadable }
    }

    /// True when the file on disk could not be loaded and writes are refused
    pub fn is_read_only(&self) -> bool {
        self.unreadable.is_some()
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io { path: self.path.display().to_string(), source };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(reason) = &self.unreadable {
            return Err(StoreError::Unreadable {
                path: self.path.display().to_string(),
                reason: reason.clone(),
            });
        }
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // Keep memory consistent with disk
            match previous {
                Some(prev) => entries.insert(key.to_string(), prev),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

/// In-process store, contents lost on drop
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
