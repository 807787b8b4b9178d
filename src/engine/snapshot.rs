//! Pre-modification file snapshots.
//!
//! The first mutation of a path captures the file's content so the
//! presentation layer can show what changed. Later mutations never overwrite
//! the captured original. Entries are evicted oldest-inserted first.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::tools::{FileSystem, normalize_path};

/// Maximum number of snapshots to keep by default.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 50;

/// Content of a file before the first mutation this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBackupEntry {
    pub resolved_path: PathBuf,
    /// `None` if the file did not exist yet.
    pub original_content: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Before/after pair for rendering a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: PathBuf,
    /// `None` if never captured or the file was created this session.
    pub original: Option<String>,
    /// `None` if the file no longer exists.
    pub current: Option<String>,
}

impl FileDiff {
    /// Whether the original content and the current content differ.
    pub fn has_changes(&self) -> bool {
        self.original != self.current
    }
}

/// Bounded map of file backups keyed by resolved path.
pub struct FileSnapshotStore {
    fs: Arc<dyn FileSystem>,
    workspace_root: PathBuf,
    entries: HashMap<PathBuf, FileBackupEntry>,
    /// Insertion order, oldest first.
    order: VecDeque<PathBuf>,
    max_entries: usize,
}

impl FileSnapshotStore {
    /// Create a store resolving relative paths against `workspace_root`.
    pub fn new(fs: Arc<dyn FileSystem>, workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root: PathBuf = workspace_root.into();
        Self {
            fs,
            workspace_root: normalize_path(&workspace_root),
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries: DEFAULT_MAX_SNAPSHOTS,
        }
    }

    /// Create with a custom capacity.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Configured capacity.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Absolute, lexically normalized form of `path`.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        };
        normalize_path(&joined)
    }

    /// Whether a resolved path lies under the workspace root.
    pub fn is_within_root(&self, resolved: &Path) -> bool {
        resolved.starts_with(&self.workspace_root)
    }

    /// Capture the current content of `path` unless it is already captured.
    ///
    /// Returns `Ok(true)` if a new entry was recorded. A missing file is
    /// recorded with no original content. Other read errors are returned
    /// and nothing is recorded, so a later mutation can try again. Paths
    /// outside the workspace root are never read.
    pub async fn capture(&mut self, path: impl AsRef<Path>) -> io::Result<bool> {
        let resolved = self.resolve(path);
        if !self.is_within_root(&resolved) {
            tracing::debug!(path = %resolved.display(), "Not capturing path outside workspace");
            return Ok(false);
        }
        if self.entries.contains_key(&resolved) {
            return Ok(false);
        }

        let original_content = match self.fs.read_to_string(&resolved).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        tracing::debug!(
            path = %resolved.display(),
            existed = original_content.is_some(),
            "Captured file snapshot"
        );

        self.order.push_back(resolved.clone());
        self.entries.insert(
            resolved.clone(),
            FileBackupEntry {
                resolved_path: resolved,
                original_content,
                captured_at: Utc::now(),
            },
        );
        Ok(true)
    }

    /// Drop oldest-inserted entries until at most `max_entries` remain.
    ///
    /// Returns the number of entries removed.
    pub fn evict_oldest(&mut self, max_entries: usize) -> usize {
        let mut removed = 0;
        while self.order.len() > max_entries {
            if let Some(path) = self.order.pop_front() {
                self.entries.remove(&path);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, remaining = self.order.len(), "Evicted file snapshots");
        }
        removed
    }

    /// Evict down to the configured capacity.
    pub fn evict(&mut self) -> usize {
        self.evict_oldest(self.max_entries)
    }

    /// Original and current content of `path`.
    ///
    /// Both sides are empty for paths outside the workspace root.
    pub async fn diff(&self, path: impl AsRef<Path>) -> FileDiff {
        let resolved = self.resolve(path);
        if !self.is_within_root(&resolved) {
            return FileDiff {
                path: resolved,
                original: None,
                current: None,
            };
        }
        let original = self
            .entries
            .get(&resolved)
            .and_then(|entry| entry.original_content.clone());
        let current = self.fs.read_to_string(&resolved).await.ok();

        FileDiff {
            path: resolved,
            original,
            current,
        }
    }

    /// Snapshot for `path`, if captured.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<&FileBackupEntry> {
        self.entries.get(&self.resolve(path))
    }

    /// Whether `path` has been captured.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.entries.contains_key(&self.resolve(path))
    }

    /// Captured paths, oldest first.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget every snapshot.
    pub fn clear_all(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::tools::MemoryFs;

    fn store(fs: &Arc<MemoryFs>) -> FileSnapshotStore {
        FileSnapshotStore::new(Arc::clone(fs) as Arc<dyn FileSystem>, "/ws")
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let fs = Arc::new(MemoryFs::new());
        let store = store(&fs);

        assert_eq!(store.resolve("src/./a.rs"), PathBuf::from("/ws/src/a.rs"));
        assert_eq!(store.resolve("/other/b.rs"), PathBuf::from("/other/b.rs"));
        assert_eq!(store.resolve("src/../c.rs"), PathBuf::from("/ws/c.rs"));
    }

    #[tokio::test]
    async fn test_first_capture_wins() {
        let fs = Arc::new(MemoryFs::new());
        fs.write("/ws/a.txt", "before").await;
        let mut store = store(&fs);

        assert!(store.capture("a.txt").await.unwrap());
        fs.write("/ws/a.txt", "after first write").await;
        assert!(!store.capture("/ws/a.txt").await.unwrap());

        let entry = store.get("a.txt").unwrap();
        assert_eq!(entry.original_content.as_deref(), Some("before"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_recorded_as_new() {
        let fs = Arc::new(MemoryFs::new());
        let mut store = store(&fs);

        assert!(store.capture("new.txt").await.unwrap());
        fs.write("/ws/new.txt", "created").await;
        assert!(!store.capture("new.txt").await.unwrap());

        let diff = store.diff("new.txt").await;
        assert_eq!(diff.original, None);
        assert_eq!(diff.current.as_deref(), Some("created"));
        assert!(diff.has_changes());
    }

    #[tokio::test]
    async fn test_eviction_removes_oldest_inserted() {
        let fs = Arc::new(MemoryFs::new());
        let mut store = store(&fs);

        for i in 0..51 {
            store.capture(format!("f{}.txt", i)).await.unwrap();
        }
        assert_eq!(store.len(), 51);

        let removed = store.evict_oldest(50);
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 50);
        assert!(!store.contains("f0.txt"));
        assert!(store.contains("f1.txt"));
        assert!(store.contains("f50.txt"));
        assert_eq!(store.paths().next(), Some(&PathBuf::from("/ws/f1.txt")));
    }

    #[tokio::test]
    async fn test_evict_uses_configured_capacity() {
        let fs = Arc::new(MemoryFs::new());
        let mut store = store(&fs).with_max_entries(2);

        for name in ["a", "b", "c"] {
            store.capture(name).await.unwrap();
        }
        assert_eq!(store.evict(), 1);
        assert!(!store.contains("a"));
    }

    #[tokio::test]
    async fn test_diff_without_snapshot() {
        let fs = Arc::new(MemoryFs::new());
        fs.write("/ws/untouched.txt", "same").await;
        let store = store(&fs);

        let diff = store.diff("untouched.txt").await;
        assert_eq!(
            diff,
            FileDiff {
                path: PathBuf::from("/ws/untouched.txt"),
                original: None,
                current: Some("same".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_paths_outside_root_are_not_read() {
        let fs = Arc::new(MemoryFs::new());
        fs.write("/etc/secret", "TOPSECRET").await;
        let mut store = store(&fs);

        assert!(!store.capture("../etc/secret").await.unwrap());
        assert!(!store.capture("/etc/secret").await.unwrap());
        assert!(store.is_empty());

        let diff = store.diff("/etc/secret").await;
        assert_eq!(diff.original, None);
        assert_eq!(diff.current, None);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let fs = Arc::new(MemoryFs::new());
        let mut store = store(&fs);
        store.capture("a").await.unwrap();
        store.clear_all();
        assert!(store.is_empty());
        assert!(store.capture("a").await.unwrap());
    }
}
