//! Conflict detection and resolution.
//!
//! Two versions of a file conflict only when their vector clocks are
//! concurrent. Causally ordered versions are never conflicts, whatever
//! their content. Wall-clock time is consulted only to pick a winner once
//! a conflict has been detected.

use crate::config::ConflictConfig;
use crate::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use regionsync_types::{
    CausalOrder, ConflictId, FileId, FileMetadata, GlobalFileMetadata, VectorClock,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Strategy used to settle a conflict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The version with the later `updated_at` wins.
    #[default]
    LastWriterWins,
    /// Both versions survive; the non-primary one becomes a new file.
    Fork,
    /// Field-level reconciliation through a [`MergeHandler`].
    Merge,
    /// Escalate for a human decision.
    Manual,
}

/// One side of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Remote,
}

/// Winner of a last-writer-wins resolution when both `updated_at`
/// timestamps are identical.
pub const LWW_TIE_WINNER: Side = Side::Local;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    /// Terminal.
    Resolved,
    /// Awaiting manual resolution.
    Escalated,
}

/// Two concurrent versions of the same file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub file_id: FileId,
    pub local: GlobalFileMetadata,
    pub remote: GlobalFileMetadata,
    pub detected_at: DateTime<Utc>,
    pub status: ConflictStatus,
}

/// Outcome of resolving a [`Conflict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub conflict_id: ConflictId,
    pub strategy: ConflictStrategy,
    /// Surviving version of the file. `None` when escalated.
    pub result: Option<GlobalFileMetadata>,
    /// The losing version, for last-writer-wins.
    pub rejected: Option<GlobalFileMetadata>,
    /// The renamed copy registered as a new file, for fork.
    pub forked: Option<GlobalFileMetadata>,
    pub resolved_at: DateTime<Utc>,
}

/// Deployment-defined field-level merge.
///
/// The default keeps the content descriptor of the later writer (ties go
/// to [`LWW_TIE_WINNER`]) and takes the union of custom metadata, with the
/// later writer's values winning on shared keys.
pub trait MergeHandler: Send + Sync {
    fn merge(&self, local: &FileMetadata, remote: &FileMetadata) -> FileMetadata {
        let (winner, loser) = match lww_winner(local.updated_at, remote.updated_at) {
            Side::Local => (local, remote),
            Side::Remote => (remote, local),
        };
        let mut merged = winner.clone();
        for (key, value) in &loser.custom_meta {
            merged
                .custom_meta
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        merged
    }
}

/// The default [`MergeHandler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMerge;

impl MergeHandler for FieldMerge {}

fn lww_winner(local: DateTime<Utc>, remote: DateTime<Utc>) -> Side {
    match local.cmp(&remote) {
        std::cmp::Ordering::Greater => Side::Local,
        std::cmp::Ordering::Less => Side::Remote,
        std::cmp::Ordering::Equal => LWW_TIE_WINNER,
    }
}

/// Detects and resolves conflicts between file versions.
#[derive(Clone)]
pub struct ConflictResolver {
    default_strategy: ConflictStrategy,
    merge: Arc<dyn MergeHandler>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(&ConflictConfig::default())
    }
}

impl ConflictResolver {
    #[must_use]
    pub fn new(config: &ConflictConfig) -> Self {
        Self {
            default_strategy: config.default_strategy,
            merge: Arc::new(FieldMerge),
        }
    }

    /// Replaces the merge hook used by [`ConflictStrategy::Merge`].
    #[must_use]
    pub fn with_merge_handler(mut self, handler: Arc<dyn MergeHandler>) -> Self {
        self.merge = handler;
        self
    }

    #[must_use]
    pub fn default_strategy(&self) -> ConflictStrategy {
        self.default_strategy
    }

    /// Returns a pending conflict iff the two clocks are concurrent.
    #[must_use]
    pub fn detect(
        &self,
        local: &GlobalFileMetadata,
        remote: &GlobalFileMetadata,
    ) -> Option<Conflict> {
        if local.vector_clock().compare(remote.vector_clock()) != CausalOrder::Concurrent {
            return None;
        }
        let conflict = Conflict {
            id: ConflictId::new(),
            file_id: local.id(),
            local: local.clone(),
            remote: remote.clone(),
            detected_at: Utc::now(),
            status: ConflictStatus::Pending,
        };
        warn!(
            conflict_id = %conflict.id,
            file_id = %conflict.file_id,
            "Detected concurrent versions: local {} vs remote {}",
            local.vector_clock(),
            remote.vector_clock()
        );
        Some(conflict)
    }

    /// Resolves a pending conflict with `strategy`, or the configured
    /// default when `None`.
    ///
    /// Resolved versions carry the merge of both clocks and a version above
    /// both inputs, so they causally follow everything the conflict saw.
    pub fn resolve(
        &self,
        conflict: &mut Conflict,
        strategy: Option<ConflictStrategy>,
    ) -> SyncResult<Resolution> {
        if conflict.status != ConflictStatus::Pending {
            return Err(SyncError::AlreadyResolved(conflict.id));
        }
        let strategy = strategy.unwrap_or(self.default_strategy);

        let resolution = match strategy {
            ConflictStrategy::LastWriterWins => {
                let side = lww_winner(conflict.local.updated_at(), conflict.remote.updated_at());
                Self::pick(conflict, side, strategy)
            }
            ConflictStrategy::Fork => Self::fork(conflict),
            ConflictStrategy::Merge => {
                let merged = self.merge.merge(&conflict.local.file, &conflict.remote.file);
                let mut result = conflict.local.clone();
                result.file = merged;
                supersede(&mut result.file, &conflict.local.file, &conflict.remote.file);
                Resolution {
                    conflict_id: conflict.id,
                    strategy,
                    result: Some(result),
                    rejected: None,
                    forked: None,
                    resolved_at: Utc::now(),
                }
            }
            ConflictStrategy::Manual => {
                conflict.status = ConflictStatus::Escalated;
                info!(conflict_id = %conflict.id, file_id = %conflict.file_id, "Conflict escalated for manual resolution");
                return Ok(Resolution {
                    conflict_id: conflict.id,
                    strategy,
                    result: None,
                    rejected: None,
                    forked: None,
                    resolved_at: Utc::now(),
                });
            }
        };

        conflict.status = ConflictStatus::Resolved;
        debug!(conflict_id = %conflict.id, ?strategy, "Conflict resolved");
        Ok(resolution)
    }

    /// Settles a pending or escalated conflict by choosing one side.
    pub fn accept(&self, conflict: &mut Conflict, side: Side) -> SyncResult<Resolution> {
        if conflict.status == ConflictStatus::Resolved {
            return Err(SyncError::AlreadyResolved(conflict.id));
        }
        let resolution = Self::pick(conflict, side, ConflictStrategy::Manual);
        conflict.status = ConflictStatus::Resolved;
        info!(conflict_id = %conflict.id, ?side, "Conflict resolved manually");
        Ok(resolution)
    }

    fn pick(conflict: &Conflict, side: Side, strategy: ConflictStrategy) -> Resolution {
        let (winner, loser) = match side {
            Side::Local => (&conflict.local, &conflict.remote),
            Side::Remote => (&conflict.remote, &conflict.local),
        };
        let mut result = winner.clone();
        supersede(&mut result.file, &conflict.local.file, &conflict.remote.file);
        Resolution {
            conflict_id: conflict.id,
            strategy,
            result: Some(result),
            rejected: Some(loser.clone()),
            forked: None,
            resolved_at: Utc::now(),
        }
    }

    fn fork(conflict: &Conflict) -> Resolution {
        let mut result = conflict.local.clone();
        supersede(&mut result.file, &conflict.local.file, &conflict.remote.file);

        let mut copy = conflict.remote.file.clone();
        copy.id = FileId::new();
        copy.name.push_str(".conflict");
        copy.path.push_str(".conflict");
        copy.version = 1;
        copy.created_at = Utc::now();

        Resolution {
            conflict_id: conflict.id,
            strategy: ConflictStrategy::Fork,
            result: Some(result),
            rejected: None,
            forked: Some(GlobalFileMetadata::new(copy)),
            resolved_at: Utc::now(),
        }
    }
}

/// Makes `result` causally follow both inputs.
fn supersede(result: &mut FileMetadata, local: &FileMetadata, remote: &FileMetadata) {
    result.vector_clock = VectorClock::merged(&local.vector_clock, &remote.vector_clock);
    result.version = local.version.max(remote.version) + 1;
}
