//! Region-local metadata capability and its factory.

use crate::{MemoryMetadataStore, SqliteMetadataStore, StorageResult};
use regionsync_types::{FileId, FileMetadata, SyncState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Persistent view of a region's file metadata.
///
/// Implementations are synchronous; calls are short and local.
pub trait MetadataStore: Send + Sync {
    fn get(&self, id: &FileId) -> StorageResult<Option<FileMetadata>>;

    /// Looks a file up by path, preferring the most recent live record over
    /// tombstones.
    fn get_by_path(&self, path: &str) -> StorageResult<Option<FileMetadata>>;

    /// Inserts or replaces a record.
    fn save(&self, metadata: &FileMetadata) -> StorageResult<()>;

    /// Physically removes a record.
    fn delete(&self, id: &FileId) -> StorageResult<()>;

    /// Lists the direct children of `dir`, sorted by path.
    fn list(&self, dir: &str) -> StorageResult<Vec<FileMetadata>>;

    /// Lists up to `limit` records in `state`, oldest update first.
    fn list_by_state(&self, state: SyncState, limit: usize) -> StorageResult<Vec<FileMetadata>>;
}

/// Which metadata store to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetadataStoreKind {
    Sqlite { path: PathBuf },
    Memory,
}

impl Default for MetadataStoreKind {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("data/metadata.db"),
        }
    }
}

/// Opens the configured metadata store.
pub fn open_metadata_store(kind: &MetadataStoreKind) -> StorageResult<Arc<dyn MetadataStore>> {
    match kind {
        MetadataStoreKind::Sqlite { path } => Ok(Arc::new(SqliteMetadataStore::open(path)?)),
        MetadataStoreKind::Memory => Ok(Arc::new(MemoryMetadataStore::new())),
    }
}

/// Canonical form of a directory argument: no trailing slash except root.
pub(crate) fn normalize_dir(dir: &str) -> &str {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}
