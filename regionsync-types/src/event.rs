//! Change events: the unit of propagation between regions.

use crate::{EventId, FileId, FileMetadata, RegionId, VectorClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of mutation carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A create, update or delete against one file entity.
///
/// Carries the full metadata snapshot and the clock at the time of the
/// mutation. `attempts` is retry bookkeeping local to the sending region
/// and is never put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: EventId,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub file_id: FileId,
    pub metadata: FileMetadata,
    #[serde(default)]
    pub vector_clock: VectorClock,
    pub timestamp: DateTime<Utc>,
    pub region_id: RegionId,
    #[serde(skip)]
    pub attempts: u32,
}

impl ChangeEvent {
    /// Snapshots `metadata` into a new event originating in `region`.
    #[must_use]
    pub fn new(change_type: ChangeType, metadata: &FileMetadata, region: &RegionId) -> Self {
        Self {
            id: EventId::new(),
            change_type,
            file_id: metadata.id,
            metadata: metadata.clone(),
            vector_clock: metadata.vector_clock.clone(),
            timestamp: Utc::now(),
            region_id: region.clone(),
            attempts: 0,
        }
    }

    /// Serializes the event to its JSON wire form.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an event from its JSON wire form.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
