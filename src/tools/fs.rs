//! File system access used for snapshots and diffs.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Lexically normalize a path, dropping `.` and folding `..`.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Read-only file access.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read the whole file as UTF-8.
    async fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Whether a file exists at `path`.
    async fn exists(&self, path: &Path) -> bool;
}

/// The host file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

#[async_trait]
impl FileSystem for LocalFs {
    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// In-memory file system for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: RwLock<HashMap<PathBuf, String>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a file.
    pub async fn write(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.write().await.insert(path.into(), content.into());
    }

    /// Remove a file.
    pub async fn remove(&self, path: &Path) {
        self.files.write().await.remove(path);
    }
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.read().await.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_parent_dirs() {
        assert_eq!(
            normalize_path(Path::new("/ws/src/../lib/./a.rs")),
            PathBuf::from("/ws/lib/a.rs")
        );
    }

    #[tokio::test]
    async fn test_memory_fs_round_trip() {
        let fs = MemoryFs::new();
        let path = Path::new("/ws/a.txt");

        assert!(!fs.exists(path).await);
        let err = fs.read_to_string(path).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        fs.write(path, "hello").await;
        assert!(fs.exists(path).await);
        assert_eq!(fs.read_to_string(path).await.unwrap(), "hello");

        fs.remove(path).await;
        assert!(!fs.exists(path).await);
    }

    #[tokio::test]
    async fn test_local_fs_reads_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("b.txt");
        std::fs::write(&path, "content").unwrap();

        assert!(LocalFs.exists(&path).await);
        assert_eq!(LocalFs.read_to_string(&path).await.unwrap(), "content");
        assert!(!LocalFs.exists(&dir.path().join("missing.txt")).await);
    }
}
