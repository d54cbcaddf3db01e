//! In-memory variants of both storage capabilities.

use crate::metadata_store::normalize_dir;
use crate::{FileInfo, MetadataStore, StorageBackend, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regionsync_types::{FileId, FileMetadata, SyncState};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// ── Content ─────────────────────────────────────────────────────

/// Content backend held entirely in memory.
#[derive(Default)]
pub struct MemoryBackend {
    objects: tokio::sync::RwLock<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(&self, key: &str, content: &[u8]) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        self.objects
            .write()
            .await
            .insert(key.to_string(), (content.to_vec(), Utc::now()));
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|(content, _)| content.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn stat(&self, key: &str) -> StorageResult<FileInfo> {
        let objects = self.objects.read().await;
        let (content, modified_at) = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(FileInfo {
            key: key.to_string(),
            size: content.len() as u64,
            modified_at: *modified_at,
        })
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ── Metadata ────────────────────────────────────────────────────

/// Metadata store held entirely in memory.
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<FileId, FileMetadata>>,
}

impl MemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, HashMap<FileId, FileMetadata>>> {
        self.records
            .read()
            .map_err(|_| StorageError::Database("metadata lock poisoned".into()))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, HashMap<FileId, FileMetadata>>> {
        self.records
            .write()
            .map_err(|_| StorageError::Database("metadata lock poisoned".into()))
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn get(&self, id: &FileId) -> StorageResult<Option<FileMetadata>> {
        Ok(self.read()?.get(id).cloned())
    }

    fn get_by_path(&self, path: &str) -> StorageResult<Option<FileMetadata>> {
        Ok(self
            .read()?
            .values()
            .filter(|m| m.path == path)
            .max_by_key(|m| (!m.is_tombstone(), m.updated_at))
            .cloned())
    }

    fn save(&self, metadata: &FileMetadata) -> StorageResult<()> {
        self.write()?.insert(metadata.id, metadata.clone());
        Ok(())
    }

    fn delete(&self, id: &FileId) -> StorageResult<()> {
        self.write()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<FileMetadata>> {
        let mut out: Vec<_> = self
            .read()?
            .values()
            .filter(|m| m.dir() == normalize_dir(dir))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    fn list_by_state(&self, state: SyncState, limit: usize) -> StorageResult<Vec<FileMetadata>> {
        let mut out: Vec<_> = self
            .read()?
            .values()
            .filter(|m| m.sync_state == state)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.updated_at);
        out.truncate(limit);
        Ok(out)
    }
}
