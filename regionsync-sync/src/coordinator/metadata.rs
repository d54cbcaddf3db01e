//! Authoritative global metadata.

use crate::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::Utc;
use regionsync_types::{
    CausalOrder, FileId, FileMetadata, GlobalFileMetadata, LocalState, RegionId, RegionLocation,
    ReplicationState, SyncState, VectorClock,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Result of a clock-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The incoming version causally followed the stored one and replaced it.
    Applied,
    /// The incoming version was older or equal; nothing changed.
    Stale,
}

/// Single writer of record for global file metadata.
///
/// Writes compare the incoming clock against the stored one atomically, so
/// concurrent updates to the same file cannot race past the conflict check.
#[async_trait]
pub trait GlobalMetadataManager: Send + Sync {
    async fn get(&self, id: &FileId) -> SyncResult<GlobalFileMetadata>;

    /// Registers a new file with its origin as primary. Rejects duplicates.
    async fn register(&self, file: FileMetadata) -> SyncResult<GlobalFileMetadata>;

    /// Replaces the stored version if `file` causally follows it.
    ///
    /// Fails with [`SyncError::Conflict`] when the clocks are concurrent.
    async fn update(&self, file: FileMetadata, from: &RegionId) -> SyncResult<UpdateOutcome>;

    /// Tombstones a file. The record is never physically removed.
    async fn delete(&self, id: &FileId, clock: &VectorClock, from: &RegionId) -> SyncResult<UpdateOutcome>;

    async fn get_locations(&self, id: &FileId) -> SyncResult<Vec<RegionLocation>>;

    async fn record_location(&self, id: &FileId, region: &RegionId, state: ReplicationState) -> SyncResult<()>;

    /// Stores the result of a conflict resolution. Its clock must dominate
    /// the stored one.
    async fn put_resolved(&self, resolved: GlobalFileMetadata) -> SyncResult<()>;

    async fn list(&self) -> SyncResult<Vec<GlobalFileMetadata>>;
}

/// [`GlobalMetadataManager`] held in memory behind one lock.
#[derive(Default)]
pub struct InMemoryMetadataManager {
    files: RwLock<HashMap<FileId, GlobalFileMetadata>>,
}

impl InMemoryMetadataManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: &FileId) -> SyncError {
    SyncError::NotFound(format!("file {id}"))
}

#[async_trait]
impl GlobalMetadataManager for InMemoryMetadataManager {
    async fn get(&self, id: &FileId) -> SyncResult<GlobalFileMetadata> {
        self.files
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn register(&self, file: FileMetadata) -> SyncResult<GlobalFileMetadata> {
        let mut files = self.files.write().await;
        if files.contains_key(&file.id) {
            return Err(SyncError::AlreadyExists(format!("file {}", file.id)));
        }
        let mut global = GlobalFileMetadata::new(file);
        global.file.sync_state = SyncState::Synced;
        debug!(file_id = %global.id(), primary = %global.primary, "Registered file");
        files.insert(global.id(), global.clone());
        Ok(global)
    }

    async fn update(&self, file: FileMetadata, from: &RegionId) -> SyncResult<UpdateOutcome> {
        let mut files = self.files.write().await;
        let stored = files.get_mut(&file.id).ok_or_else(|| not_found(&file.id))?;

        match stored.vector_clock().compare(&file.vector_clock) {
            CausalOrder::Before => {
                stored.file = file;
                stored.file.sync_state = SyncState::Synced;
                stored.set_location(from, ReplicationState::Synced, Utc::now());
                stored.mark_others_stale(from);
                Ok(UpdateOutcome::Applied)
            }
            CausalOrder::After | CausalOrder::Equal => Ok(UpdateOutcome::Stale),
            CausalOrder::Concurrent => Err(SyncError::Conflict { file_id: file.id }),
        }
    }

    async fn delete(&self, id: &FileId, clock: &VectorClock, from: &RegionId) -> SyncResult<UpdateOutcome> {
        let mut files = self.files.write().await;
        let stored = files.get_mut(id).ok_or_else(|| not_found(id))?;

        match stored.vector_clock().compare(clock) {
            CausalOrder::Before => {
                let now = Utc::now();
                let file = &mut stored.file;
                file.local_state = LocalState::Deleted;
                file.absorb_clock(clock);
                file.version += 1;
                file.updated_at = now;
                file.updated_by = from.to_string();
                stored.set_location(from, ReplicationState::Synced, now);
                stored.mark_others_stale(from);
                Ok(UpdateOutcome::Applied)
            }
            CausalOrder::After | CausalOrder::Equal => Ok(UpdateOutcome::Stale),
            CausalOrder::Concurrent => Err(SyncError::Conflict { file_id: *id }),
        }
    }

    async fn get_locations(&self, id: &FileId) -> SyncResult<Vec<RegionLocation>> {
        Ok(self.get(id).await?.locations)
    }

    async fn record_location(&self, id: &FileId, region: &RegionId, state: ReplicationState) -> SyncResult<()> {
        let mut files = self.files.write().await;
        let stored = files.get_mut(id).ok_or_else(|| not_found(id))?;
        stored.set_location(region, state, Utc::now());
        Ok(())
    }

    async fn put_resolved(&self, resolved: GlobalFileMetadata) -> SyncResult<()> {
        let mut files = self.files.write().await;
        match files.get_mut(&resolved.id()) {
            Some(stored) => {
                if !resolved.vector_clock().dominates(stored.vector_clock()) {
                    return Err(SyncError::Conflict {
                        file_id: resolved.id(),
                    });
                }
                stored.file = resolved.file;
                for location in resolved.locations {
                    if stored.location(&location.region_id).is_none() {
                        stored.set_location(&location.region_id, location.state, location.last_sync_at);
                    }
                }
                stored.mark_others_stale(&RegionId::coordinator());
            }
            None => {
                files.insert(resolved.id(), resolved);
            }
        }
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<GlobalFileMetadata>> {
        Ok(self.files.read().await.values().cloned().collect())
    }
}
