//! Key-value persistence.
//!
//! All per-user state lives behind [`KvStore`]: single-key atomic get, set,
//! delete, take and compare-and-set. Two implementations:
//!
//! - [`MemoryKvStore`]: a `HashMap` behind a lock; state is lost on restart.
//! - [`FileKvStore`]: one file per key under a directory, written via
//!   temp-file + rename with 0600 permissions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use mailbridge_types::error::StoreError;

/// Shared key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value; `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove a key and return what it held, in one step. Of several
    /// concurrent takes of the same key at most one sees the value.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write `new` only if the current value equals `expected`
    /// (`None` = key absent). Returns whether the write happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError>;
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Process-local store.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Sorted list of keys currently present.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.write().await.remove(key))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        if entries.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), new.to_vec());
        Ok(true)
    }
}

// ── File-backed ──────────────────────────────────────────────────────────

/// Directory-backed store; each key is a hex-named file.
pub struct FileKvStore {
    dir: PathBuf,
    /// Serializes compare-and-set against other writers in this process.
    write_lock: Mutex<()>,
}

impl FileKvStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        set_permissions(&dir, 0o700).await?;
        debug!(path = %dir.display(), "opened file kv store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key.bytes().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{name}.kv"))
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("kv.tmp");
        tokio::fs::write(&tmp, value).await?;
        set_permissions(&tmp, 0o600).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.remove(key).await
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self.read(key).await?;
        if current.is_some() {
            self.remove(key).await?;
        }
        Ok(current)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self.read(key).await?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        self.write(key, new).await?;
        Ok(true)
    }
}

#[cfg(unix)]
async fn set_permissions(path: &Path, mode: u32) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_permissions(_path: &Path, _mode: u32) -> Result<(), StoreError> {
    Ok(())
}
