//! The region's view of the coordinator.

use crate::coordinator::RegionStatus;
use crate::protocol::EventOutcome;
use crate::SyncResult;
use async_trait::async_trait;
use regionsync_types::{ChangeEvent, RegionId};

/// Request/response channel from a region to the coordinator.
///
/// Implementations report transient failures with retryable errors (see
/// [`SyncError::is_retryable`](crate::SyncError::is_retryable)); retrying
/// is the agent's job, not the client's.
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    /// Submits change events, returning one outcome per event.
    async fn push_changes(&self, events: &[ChangeEvent]) -> SyncResult<Vec<EventOutcome>>;

    /// Fetches (and clears) the changes pending for `region`.
    async fn pull_changes(&self, region: &RegionId) -> SyncResult<Vec<ChangeEvent>>;

    /// Reports liveness and status.
    async fn heartbeat(&self, region: &RegionId, status: &RegionStatus) -> SyncResult<()>;
}

/// Scriptable client for tests.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use crate::protocol::OutcomeStatus;
    use crate::SyncError;
    use regionsync_types::FileId;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    /// Failure to inject into the next call of [`MockCoordinatorClient`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockFailure {
        /// A retryable delivery failure.
        Transient,
        /// A permanent refusal.
        Permanent,
    }

    impl MockFailure {
        fn into_error(self) -> SyncError {
            match self {
                Self::Transient => SyncError::SyncFailed("injected transient failure".into()),
                Self::Permanent => SyncError::InvalidMetadata("injected permanent failure".into()),
            }
        }
    }

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records everything a region sends and replays scripted responses.
    #[derive(Debug, Default)]
    pub struct MockCoordinatorClient {
        pushed: Mutex<Vec<ChangeEvent>>,
        push_calls: Mutex<usize>,
        failures: Mutex<VecDeque<MockFailure>>,
        outcomes: Mutex<HashMap<FileId, OutcomeStatus>>,
        inbound: Mutex<VecDeque<ChangeEvent>>,
        heartbeats: Mutex<Vec<(RegionId, RegionStatus)>>,
        delay: Mutex<Option<Duration>>,
    }

    impl MockCoordinatorClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next `n` push/pull calls fail.
        pub fn fail_next(&self, n: usize, failure: MockFailure) {
            lock(&self.failures).extend(std::iter::repeat_n(failure, n));
        }

        /// Answers events for `file_id` with `status` instead of `Applied`.
        pub fn respond_with(&self, file_id: FileId, status: OutcomeStatus) {
            lock(&self.outcomes).insert(file_id, status);
        }

        /// Makes every push sleep before answering.
        pub fn set_delay(&self, delay: Duration) {
            *lock(&self.delay) = Some(delay);
        }

        /// Queues an event to be returned by the next pull.
        pub fn queue_inbound(&self, event: ChangeEvent) {
            lock(&self.inbound).push_back(event);
        }

        /// Every event successfully pushed so far, in order.
        pub fn pushed(&self) -> Vec<ChangeEvent> {
            lock(&self.pushed).clone()
        }

        /// Number of push calls, including failed ones.
        pub fn push_calls(&self) -> usize {
            *lock(&self.push_calls)
        }

        pub fn heartbeats(&self) -> Vec<(RegionId, RegionStatus)> {
            lock(&self.heartbeats).clone()
        }

        fn take_failure(&self) -> Option<SyncError> {
            lock(&self.failures).pop_front().map(MockFailure::into_error)
        }
    }

    #[async_trait]
    impl CoordinatorClient for MockCoordinatorClient {
        async fn push_changes(&self, events: &[ChangeEvent]) -> SyncResult<Vec<EventOutcome>> {
            *lock(&self.push_calls) += 1;
            let delay = *lock(&self.delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            lock(&self.pushed).extend(events.iter().cloned());
            let outcomes = lock(&self.outcomes);
            Ok(events
                .iter()
                .map(|e| {
                    let status = outcomes
                        .get(&e.file_id)
                        .cloned()
                        .unwrap_or(OutcomeStatus::Applied);
                    EventOutcome::new(e.id, status)
                })
                .collect())
        }

        async fn pull_changes(&self, _region: &RegionId) -> SyncResult<Vec<ChangeEvent>> {
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            Ok(lock(&self.inbound).drain(..).collect())
        }

        async fn heartbeat(&self, region: &RegionId, status: &RegionStatus) -> SyncResult<()> {
            lock(&self.heartbeats).push((region.clone(), status.clone()));
            Ok(())
        }
    }
}
