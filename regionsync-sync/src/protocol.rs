//! Messages exchanged between regions and the coordinator.

use regionsync_types::EventId;
use serde::{Deserialize, Serialize};

/// What the coordinator did with one submitted change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Accepted and scheduled for fan-out.
    Applied,
    /// Causally older than or equal to the stored version; nothing to do.
    Stale,
    /// Concurrent with the stored version; the coordinator resolved the
    /// conflict and will deliver the result to every region.
    Resolved,
    /// Concurrent and held for manual resolution.
    Escalated,
    /// Permanently refused.
    Rejected(String),
}

impl OutcomeStatus {
    /// Returns true if the region's version is now reflected globally.
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Applied | Self::Stale | Self::Resolved)
    }
}

/// Per-event result of a change submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub event_id: EventId,
    pub status: OutcomeStatus,
}

impl EventOutcome {
    #[must_use]
    pub fn new(event_id: EventId, status: OutcomeStatus) -> Self {
        Self { event_id, status }
    }
}
