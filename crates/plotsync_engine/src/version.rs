//! Persisted per-project sync version.
//!
//! The version is the only engine state that survives a restart. It lives
//! in a small key-value store under [`version_key`].

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Returns the store key for a project's sync version.
pub fn version_key(project_id: &str) -> String {
    format!("sync_version_{project_id}")
}

/// A durable key-value store for sync versions.
pub trait VersionStore: Send + Sync {
    /// Reads a value. Missing keys are `Ok(None)`.
    fn load(&self, key: &str) -> SyncResult<Option<u64>>;

    /// Writes a value, durably.
    fn store(&self, key: &str, value: u64) -> SyncResult<()>;
}

/// An in-memory version store.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    values: Mutex<BTreeMap<String, u64>>,
    writes: Mutex<Vec<(String, u64)>>,
}

impl MemoryVersionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding one value.
    #[must_use]
    pub fn with_value(key: impl Into<String>, value: u64) -> Self {
        let store = Self::new();
        store.values.lock().insert(key.into(), value);
        store
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<(String, u64)> {
        self.writes.lock().clone()
    }
}

impl VersionStore for MemoryVersionStore {
    fn load(&self, key: &str) -> SyncResult<Option<u64>> {
        Ok(self.values.lock().get(key).copied())
    }

    fn store(&self, key: &str, value: u64) -> SyncResult<()> {
        self.values.lock().insert(key.to_string(), value);
        self.writes.lock().push((key.to_string(), value));
        Ok(())
    }
}

/// A version store backed by one JSON object file.
///
/// Writes go to a sibling temp file which is synced and renamed over the
/// original, then the directory is synced, so a crash leaves either the
/// old or the new content.
#[derive(Debug)]
pub struct FileVersionStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, u64>>,
}

impl FileVersionStore {
    /// Opens the store, creating parent directories if needed.
    ///
    /// A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_error(&path, e))?;
            }
        }

        let values = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                SyncError::VersionStore(format!("{} is not a version file: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_error(&path, e)),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, u64>) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(values)
            .map_err(|e| SyncError::VersionStore(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| io_error(&tmp, e))?;
        file.sync_all().map_err(|e| io_error(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, e))?;
        sync_parent_dir(&self.path)
    }
}

/// Fsyncs the directory holding `path` so a rename into it is durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> SyncResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| io_error(dir, e))
}

/// NTFS journals metadata; directories cannot be opened for fsync.
#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> SyncResult<()> {
    Ok(())
}

impl VersionStore for FileVersionStore {
    fn load(&self, key: &str) -> SyncResult<Option<u64>> {
        Ok(self.values.lock().get(key).copied())
    }

    fn store(&self, key: &str, value: u64) -> SyncResult<()> {
        let mut values = self.values.lock();
        let previous = values.insert(key.to_string(), value);
        if let Err(e) = self.persist(&values) {
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

fn io_error(path: &Path, err: std::io::Error) -> SyncError {
    SyncError::VersionStore(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn key_format() {
        assert_eq!(version_key("proj-42"), "sync_version_proj-42");
    }

    #[test]
    fn memory_store_records_writes() {
        let store = MemoryVersionStore::with_value("a", 3);
        assert_eq!(store.load("a").unwrap(), Some(3));
        assert_eq!(store.load("b").unwrap(), None);

        store.store("a", 4).unwrap();
        assert_eq!(store.writes(), vec![("a".to_string(), 4)]);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("versions.json");

        let store = FileVersionStore::open(&path).unwrap();
        assert_eq!(store.load(&version_key("p")).unwrap(), None);
        store.store(&version_key("p"), 102).unwrap();
        store.store(&version_key("q"), 7).unwrap();
        drop(store);

        let reopened = FileVersionStore::open(&path).unwrap();
        assert_eq!(reopened.load(&version_key("p")).unwrap(), Some(102));
        assert_eq!(reopened.load(&version_key("q")).unwrap(), Some(7));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn directory_sync_after_rename() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("versions.json");
        std::fs::write(&path, b"{}").unwrap();

        assert!(sync_parent_dir(&path).is_ok());
        assert!(sync_parent_dir(Path::new("versions.json")).is_ok());
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("versions.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            FileVersionStore::open(&path),
            Err(SyncError::VersionStore(_))
        ));
    }
}
