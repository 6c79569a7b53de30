//! Filesystem abstraction and native implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Filesystem operations needed at startup.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read a file's entire contents as a UTF-8 string.
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String>;

    /// Check whether a path exists (file or directory).
    async fn exists(&self, path: &Path) -> bool;

    /// The user's home directory.
    fn home_dir(&self) -> Option<PathBuf>;
}

/// Native filesystem backed by [`tokio::fs`].
pub struct NativeFileSystem;

#[async_trait]
impl FileSystem for NativeFileSystem {
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{}").await.unwrap();

        let fs = NativeFileSystem;
        assert!(fs.exists(&path).await);
        assert_eq!(fs.read_to_string(&path).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn missing_file_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!NativeFileSystem.exists(&dir.path().join("nope")).await);
    }
}
