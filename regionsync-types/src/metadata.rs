//! File metadata held by regions and by the coordinator.

use crate::{Error, FileId, RegionId, VectorClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Presence of a file's content on the local region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalState {
    /// Content is stored locally.
    Present,
    /// Metadata is known but content has not been fetched yet.
    Pending,
    /// Tombstone: the file was deleted.
    Deleted,
}

/// Synchronisation state of a record relative to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synced,
    /// Local changes not yet acknowledged by the coordinator.
    Pending,
    /// A concurrent edit was escalated and awaits manual resolution.
    Conflict,
}

macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            /// Returns the stable lowercase name.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(Error::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(LocalState, "local state", {
    Present => "present",
    Pending => "pending",
    Deleted => "deleted",
});

string_enum!(SyncState, "sync state", {
    Synced => "synced",
    Pending => "pending",
    Conflict => "conflict",
});

/// Metadata of one file entity as seen by a region.
///
/// `version` increases with every mutation and the mutating region's entry
/// in `vector_clock` is incremented exactly once per new version; use
/// [`FileMetadata::record_mutation`] rather than touching them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: FileId,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub content_hash: String,
    pub mime_type: String,
    pub version: u64,
    pub vector_clock: VectorClock,
    #[serde(default)]
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub updated_by: String,
    pub origin_region: RegionId,
    pub local_state: LocalState,
    pub sync_state: SyncState,
    #[serde(default)]
    pub custom_meta: BTreeMap<String, String>,
}

impl FileMetadata {
    /// Default MIME type when the uploader supplies none.
    pub const DEFAULT_MIME_TYPE: &'static str = "application/octet-stream";

    /// Creates an unversioned record originating in `origin`.
    ///
    /// The record has version 0 and an empty clock until the first
    /// [`record_mutation`](Self::record_mutation).
    #[must_use]
    pub fn new(origin: RegionId, path: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: FileId::new(),
            name: name.into(),
            path: path.into(),
            size: 0,
            content_hash: String::new(),
            mime_type: Self::DEFAULT_MIME_TYPE.to_string(),
            version: 0,
            vector_clock: VectorClock::new(),
            owner_id: String::new(),
            created_at: now,
            updated_at: now,
            created_by: origin.to_string(),
            updated_by: origin.to_string(),
            origin_region: origin,
            local_state: LocalState::Present,
            sync_state: SyncState::Pending,
            custom_meta: BTreeMap::new(),
        }
    }

    /// Sets the content descriptor.
    #[must_use]
    pub fn with_content(mut self, size: u64, content_hash: impl Into<String>, mime_type: impl Into<String>) -> Self {
        self.size = size;
        self.content_hash = content_hash.into();
        self.mime_type = mime_type.into();
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    /// Records a local mutation performed by `region`.
    ///
    /// Increments the region's clock entry and the version, stamps the
    /// update time and marks the record as awaiting sync.
    pub fn record_mutation(&mut self, region: &RegionId) {
        self.vector_clock.increment(region);
        self.version += 1;
        self.updated_at = Utc::now();
        self.updated_by = region.to_string();
        self.sync_state = SyncState::Pending;
    }

    /// Turns the record into a tombstone as a new version.
    pub fn mark_deleted(&mut self, region: &RegionId) {
        self.local_state = LocalState::Deleted;
        self.record_mutation(region);
    }

    /// Merges a remote clock without producing a new version.
    pub fn absorb_clock(&mut self, other: &VectorClock) {
        self.vector_clock.merge(other);
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.local_state == LocalState::Deleted
    }

    /// Directory portion of `path` (`/` for top-level files).
    #[must_use]
    pub fn dir(&self) -> &str {
        parent_dir(&self.path)
    }
}

/// Returns the directory part of a slash-separated path.
#[must_use]
pub fn parent_dir(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Replication state of a file in one region, as tracked by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationState {
    Synced,
    Syncing,
    Stale,
}

/// Where a file lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionLocation {
    pub region_id: RegionId,
    pub state: ReplicationState,
    pub last_sync_at: DateTime<Utc>,
}

/// Coordinator-side authoritative record: a file plus its replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalFileMetadata {
    pub file: FileMetadata,
    pub locations: Vec<RegionLocation>,
    pub primary: RegionId,
    pub replicas: u32,
}

impl GlobalFileMetadata {
    /// Wraps a freshly registered file; its origin is the primary and only
    /// synced location.
    #[must_use]
    pub fn new(file: FileMetadata) -> Self {
        let primary = file.origin_region.clone();
        let mut global = Self {
            file,
            locations: Vec::new(),
            primary: primary.clone(),
            replicas: 0,
        };
        global.set_location(&primary, ReplicationState::Synced, Utc::now());
        global
    }

    #[must_use]
    pub fn id(&self) -> FileId {
        self.file.id
    }

    #[must_use]
    pub fn vector_clock(&self) -> &VectorClock {
        &self.file.vector_clock
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.file.updated_at
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.file.version
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.file.is_tombstone()
    }

    #[must_use]
    pub fn location(&self, region: &RegionId) -> Option<&RegionLocation> {
        self.locations.iter().find(|l| &l.region_id == region)
    }

    /// Inserts or updates a region's location entry.
    pub fn set_location(&mut self, region: &RegionId, state: ReplicationState, at: DateTime<Utc>) {
        match self.locations.iter_mut().find(|l| &l.region_id == region) {
            Some(location) => {
                location.state = state;
                location.last_sync_at = at;
            }
            None => self.locations.push(RegionLocation {
                region_id: region.clone(),
                state,
                last_sync_at: at,
            }),
        }
        self.replicas = u32::try_from(self.locations.len()).unwrap_or(u32::MAX);
    }

    /// Marks every location other than `region` as stale.
    pub fn mark_others_stale(&mut self, region: &RegionId) {
        for location in &mut self.locations {
            if &location.region_id != region {
                location.state = ReplicationState::Stale;
            }
        }
    }
}

/// A listing entry for a region's directory view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub file_id: FileId,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub mime_type: String,
    pub updated_at: DateTime<Utc>,
    pub sync_state: SyncState,
}

impl From<&FileMetadata> for DirectoryEntry {
    fn from(meta: &FileMetadata) -> Self {
        Self {
            file_id: meta.id,
            name: meta.name.clone(),
            path: meta.path.clone(),
            size: meta.size,
            mime_type: meta.mime_type.clone(),
            updated_at: meta.updated_at,
            sync_state: meta.sync_state,
        }
    }
}
