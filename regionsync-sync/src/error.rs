//! Error types for the sync layer.

use regionsync_storage::StorageError;
use regionsync_types::{ConflictId, FileId, RegionId};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Entity absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate registration.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// An update carried a clock concurrent with the stored one.
    #[error("concurrent update conflict on file {file_id}")]
    Conflict { file_id: FileId },

    /// Local backpressure: the change queue is saturated.
    #[error("change queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Transient delivery failure.
    #[error("sync failed: {0}")]
    SyncFailed(String),

    #[error("sync timed out after {0:?}")]
    SyncTimeout(Duration),

    #[error("region offline: {0}")]
    RegionOffline(RegionId),

    #[error("region unavailable: {0}")]
    RegionUnavailable(String),

    /// Malformed payload.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("conflict {0} already resolved")]
    AlreadyResolved(ConflictId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SyncFailed(_) | Self::SyncTimeout(_) | Self::RegionUnavailable(_)
        )
    }
}
