//! Content storage capability and its factory.

use crate::{LocalFsBackend, MemoryBackend, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Size and modification time of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub key: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Key-addressed storage for file content.
///
/// Missing keys yield [`StorageError::NotFound`](crate::StorageError::NotFound).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stores `content` under `key`, replacing any previous content.
    async fn put(&self, key: &str, content: &[u8]) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn stat(&self, key: &str) -> StorageResult<FileInfo>;

    /// Lists keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Which content backend to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendKind {
    LocalFs { root: PathBuf },
    Memory,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::LocalFs {
            root: PathBuf::from("data/files"),
        }
    }
}

/// Opens the configured content backend.
pub async fn open_backend(kind: &BackendKind) -> StorageResult<Arc<dyn StorageBackend>> {
    match kind {
        BackendKind::LocalFs { root } => Ok(Arc::new(LocalFsBackend::open(root).await?)),
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}
