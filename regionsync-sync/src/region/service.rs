//! Local file operations on a region.
//!
//! Every mutation is recorded in local metadata first and then queued for
//! the coordinator. Writes never wait on the coordinator: if the queue is
//! full the record simply stays pending until
//! [`SyncAgent::requeue_pending`] picks it up.

use crate::region::SyncAgent;
use crate::{SyncError, SyncResult};
use regionsync_storage::{MetadataStore, StorageBackend, StorageError};
use regionsync_types::{
    ChangeEvent, ChangeType, DirectoryEntry, FileId, FileMetadata, LocalState, RegionId,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

/// Region-local file service.
pub struct FileService {
    backend: Arc<dyn StorageBackend>,
    store: Arc<dyn MetadataStore>,
    agent: Arc<SyncAgent>,
}

impl FileService {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        store: Arc<dyn MetadataStore>,
        agent: Arc<SyncAgent>,
    ) -> Self {
        Self {
            backend,
            store,
            agent,
        }
    }

    pub fn region_id(&self) -> &RegionId {
        self.agent.region_id()
    }

    pub fn agent(&self) -> &Arc<SyncAgent> {
        &self.agent
    }

    fn content_key(id: &FileId) -> String {
        id.to_string()
    }

    fn live(&self, id: &FileId) -> SyncResult<FileMetadata> {
        match self.store.get(id)? {
            Some(meta) if !meta.is_tombstone() => Ok(meta),
            _ => Err(SyncError::NotFound(format!("file {id}"))),
        }
    }

    fn publish(&self, change_type: ChangeType, meta: &FileMetadata) {
        let event = ChangeEvent::new(change_type, meta, self.region_id());
        if self.agent.enqueue(event).is_err() {
            debug!(file_id = %meta.id, "Change deferred; record stays pending");
        }
    }

    /// Stores a new file at `path`.
    pub async fn upload(
        &self,
        path: &str,
        name: &str,
        content: &[u8],
        mime_type: Option<&str>,
    ) -> SyncResult<FileMetadata> {
        if path.is_empty() || name.is_empty() {
            return Err(SyncError::InvalidMetadata("path and name are required".into()));
        }
        if let Some(existing) = self.store.get_by_path(path)? {
            if !existing.is_tombstone() {
                return Err(SyncError::AlreadyExists(format!("path {path}")));
            }
        }

        let region = self.region_id().clone();
        let mut meta = FileMetadata::new(region.clone(), path, name).with_content(
            content.len() as u64,
            content_hash(content),
            mime_type.unwrap_or(FileMetadata::DEFAULT_MIME_TYPE),
        );
        meta.record_mutation(&region);

        self.backend.put(&Self::content_key(&meta.id), content).await?;
        self.store.save(&meta)?;
        self.publish(ChangeType::Create, &meta);
        info!(file_id = %meta.id, path, "Uploaded file");
        Ok(meta)
    }

    /// Replaces a file's content as a new version.
    pub async fn update_content(&self, id: &FileId, content: &[u8]) -> SyncResult<FileMetadata> {
        let mut meta = self.live(id)?;
        self.backend.put(&Self::content_key(id), content).await?;

        meta.size = content.len() as u64;
        meta.content_hash = content_hash(content);
        meta.local_state = LocalState::Present;
        meta.record_mutation(self.region_id());
        self.store.save(&meta)?;
        self.publish(ChangeType::Update, &meta);
        debug!(file_id = %id, version = meta.version, "Updated file content");
        Ok(meta)
    }

    /// Deletes a file, leaving a tombstone that propagates the deletion.
    pub async fn delete(&self, id: &FileId) -> SyncResult<FileMetadata> {
        let mut meta = self.live(id)?;
        meta.mark_deleted(self.region_id());

        match self.backend.delete(&Self::content_key(id)).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.store.save(&meta)?;
        self.publish(ChangeType::Delete, &meta);
        info!(file_id = %id, "Deleted file");
        Ok(meta)
    }

    /// Returns a file's content if it is held locally.
    pub async fn download(&self, id: &FileId) -> SyncResult<Vec<u8>> {
        let meta = self.live(id)?;
        if meta.local_state != LocalState::Present {
            return Err(SyncError::NotFound(format!(
                "content of file {id} is not available in this region"
            )));
        }
        match self.backend.get(&Self::content_key(id)).await {
            Ok(content) => Ok(content),
            Err(StorageError::NotFound(_)) => Err(SyncError::NotFound(format!("content of file {id}"))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn stat(&self, id: &FileId) -> SyncResult<FileMetadata> {
        self.live(id)
    }

    /// Lists the live files directly under `dir`.
    pub fn list(&self, dir: &str) -> SyncResult<Vec<DirectoryEntry>> {
        Ok(self
            .store
            .list(dir)?
            .iter()
            .filter(|m| !m.is_tombstone())
            .map(DirectoryEntry::from)
            .collect())
    }
}

/// Hex-encoded SHA-256 of `content`.
#[must_use]
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
