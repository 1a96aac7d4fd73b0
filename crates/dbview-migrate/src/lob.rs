//! External storage for large objects.
//!
//! Values above the inline threshold are written outside the index at a
//! path derived only from `(database, table, row, column)`, so writing the
//! same row twice overwrites the same object.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use dbview_core::config::path_component;

/// Identity of one large-object cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobKey<'a> {
    /// Database UUID.
    pub database_uuid: &'a str,
    /// Table UUID.
    pub table_uuid: &'a str,
    /// Row UUID.
    pub row_uuid: &'a str,
    /// Column position.
    pub column_index: usize,
}

impl LobKey<'_> {
    /// Relative location of the object: `<db>/<table>/<row>/col-<n>.bin`.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(path_component(self.database_uuid))
            .join(path_component(self.table_uuid))
            .join(path_component(self.row_uuid))
            .join(format!("col-{}.bin", self.column_index))
    }
}

/// Destination for large objects.
pub trait LobSink: Send + Sync {
    /// Writes `bytes` for `key`, replacing any earlier object, and returns
    /// the reference stored in the document.
    fn store(&self, key: &LobKey<'_>, bytes: &[u8]) -> io::Result<String>;
}

/// Writes large objects below a root directory.
#[derive(Debug, Clone)]
pub struct FsLobSink {
    root: PathBuf,
}

impl FsLobSink {
    /// Creates a sink rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl LobSink for FsLobSink {
    fn store(&self, key: &LobKey<'_>, bytes: &[u8]) -> io::Result<String> {
        let path = self.root.join(key.relative_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), size = bytes.len(), "Stored large object");
        Ok(path.display().to_string())
    }
}

/// Keeps large objects in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryLobSink {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryLobSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the object stored under `reference`.
    #[must_use]
    pub fn get(&self, reference: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(reference).cloned()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Returns true if nothing was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

impl LobSink for MemoryLobSink {
    fn store(&self, key: &LobKey<'_>, bytes: &[u8]) -> io::Result<String> {
        let reference = format!("mem://{}", key.relative_path().display());
        self.objects.lock().insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }
}
