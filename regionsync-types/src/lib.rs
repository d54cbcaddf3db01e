//! Core type definitions for regionsync.
//!
//! This crate defines the types shared by regions and the coordinator:
//! - File, event, conflict and region identifiers
//! - Vector clocks for causality tracking between replicas
//! - Per-region and global file metadata
//! - Change events, the unit of propagation between regions
//!
//! Nothing in here performs I/O; persistence and transport live in the
//! `regionsync-storage` and `regionsync-sync` crates.

mod clock;
mod event;
mod ids;
mod metadata;

pub use clock::{CausalOrder, VectorClock};
pub use event::{ChangeEvent, ChangeType};
pub use ids::{ConflictId, EventId, FileId, RegionId};
pub use metadata::{
    DirectoryEntry, FileMetadata, GlobalFileMetadata, LocalState, RegionLocation,
    ReplicationState, SyncState, parent_dir,
};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid region id: {0:?}")]
    InvalidRegionId(String),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
