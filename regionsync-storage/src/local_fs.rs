//! Filesystem content backend.
//!
//! Objects are sharded by the SHA-256 of their key:
//! `<root>/<h0h1>/<h2h3>/<key>`. Writes land in a temporary sibling file
//! that is renamed into place, so readers never observe partial content.

use crate::{FileInfo, StorageBackend, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

/// Content backend rooted at a local directory.
pub struct LocalFsBackend {
    root: PathBuf,
    tmp_seq: AtomicU64,
}

impl LocalFsBackend {
    /// Opens the backend, creating `root` if necessary.
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        debug!("Opened local fs backend at {}", root.display());
        Ok(Self {
            root,
            tmp_seq: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate_key(key: &str) -> StorageResult<()> {
        let invalid = key.is_empty()
            || key.starts_with('.')
            || key.contains("..")
            || key.contains('/')
            || key.contains('\\')
            || Path::new(key).is_absolute();
        if invalid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn shard_dir(&self, key: &str) -> PathBuf {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        self.root.join(&hash[0..2]).join(&hash[2..4])
    }

    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.shard_dir(key).join(key))
    }
}

fn not_found(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

async fn subdirs(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            out.push(entry.path());
        }
    }
    Ok(out)
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn put(&self, key: &str, content: &[u8]) -> StorageResult<()> {
        let path = self.key_path(key)?;
        let dir = self.shard_dir(key);
        fs::create_dir_all(&dir).await?;

        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".{key}.{}.{seq}.tmp", std::process::id()));
        if let Err(err) = fs::write(&tmp, content).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_path(key)?;
        fs::read(&path).await.map_err(|e| not_found(key, e))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        fs::remove_file(&path).await.map_err(|e| not_found(key, e))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn stat(&self, key: &str) -> StorageResult<FileInfo> {
        let path = self.key_path(key)?;
        let meta = fs::metadata(&path).await.map_err(|e| not_found(key, e))?;
        let modified_at: DateTime<Utc> = meta.modified()?.into();
        Ok(FileInfo {
            key: key.to_string(),
            size: meta.len(),
            modified_at,
        })
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for outer in subdirs(&self.root).await? {
            for inner in subdirs(&outer).await? {
                let mut entries = fs::read_dir(&inner).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if !name.starts_with('.') && name.starts_with(prefix) {
                        keys.push(name);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
