//! Region-side delivery agent.
//!
//! The agent owns the region's [`ChangeQueue`] and runs one background
//! delivery loop selected by [`SyncMode`]. Failed transmissions are retried
//! a bounded number of times with exponential backoff; every retry and
//! every drop is logged and counted in [`AgentStats`].

use crate::config::{AgentConfig, SyncMode};
use crate::conflict::{Conflict, ConflictResolver, ConflictStrategy, Resolution};
use crate::coordinator::RegionStatus;
use crate::protocol::{EventOutcome, OutcomeStatus};
use crate::region::{ChangeQueue, CoordinatorClient};
use crate::task::{TaskHandle, delayed_interval, sleep_or_cancel};
use crate::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use regionsync_storage::MetadataStore;
use regionsync_types::{
    CausalOrder, ChangeEvent, ChangeType, EventId, FileId, FileMetadata, GlobalFileMetadata,
    LocalState, RegionId, SyncState,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Point-in-time view of the agent's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Events acknowledged by the coordinator.
    pub sent: u64,
    /// Failed deliveries put back in the queue.
    pub retried: u64,
    /// Events abandoned after exhausting retries or finding the queue full.
    pub dropped: u64,
    /// Events permanently refused.
    pub rejected: u64,
    /// Inbound events received from the coordinator.
    pub pulled: u64,
    pub conflicts: u64,
    pub queued: usize,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    pulled: AtomicU64,
    conflicts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// What [`SyncAgent::apply_remote`] did with an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The file was unknown locally and has been recorded.
    Inserted,
    /// The remote version causally followed ours and replaced it.
    Replaced,
    /// Ours was equal or newer.
    Ignored,
    /// Concurrent versions were resolved with the given strategy.
    Resolved(ConflictStrategy),
    /// Concurrent versions await manual resolution.
    Escalated,
}

/// Summary of one [`SyncAgent::recover`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub fetched: usize,
    pub local_pending: usize,
    pub conflicts: usize,
    pub resolved: usize,
    pub escalated: usize,
    pub applied: usize,
    /// Remote changes that could not be applied locally.
    pub failed: usize,
    pub pushed: usize,
}

/// Drains the region's change queue towards the coordinator.
pub struct SyncAgent {
    config: AgentConfig,
    queue: ChangeQueue,
    client: Arc<dyn CoordinatorClient>,
    store: Arc<dyn MetadataStore>,
    resolver: ConflictResolver,
    counters: Counters,
    consecutive_failures: AtomicU32,
    last_sync_at: Mutex<Option<DateTime<Utc>>>,
}

impl SyncAgent {
    pub fn new(
        config: AgentConfig,
        client: Arc<dyn CoordinatorClient>,
        store: Arc<dyn MetadataStore>,
        resolver: ConflictResolver,
    ) -> Self {
        let queue = ChangeQueue::new(config.queue_capacity);
        Self {
            config,
            queue,
            client,
            store,
            resolver,
            counters: Counters::default(),
            consecutive_failures: AtomicU32::new(0),
            last_sync_at: Mutex::new(None),
        }
    }

    pub fn region_id(&self) -> &RegionId {
        &self.config.region_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn queue(&self) -> &ChangeQueue {
        &self.queue
    }

    pub fn stats(&self) -> AgentStats {
        let c = &self.counters;
        AgentStats {
            sent: c.sent.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            pulled: c.pulled.load(Ordering::Relaxed),
            conflicts: c.conflicts.load(Ordering::Relaxed),
            queued: self.queue.len(),
        }
    }

    /// Time of the last successful exchange with the coordinator.
    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch_last_sync(&self) {
        *self.last_sync_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    // ── Outbound ────────────────────────────────────────────────

    /// Queues a local change for delivery.
    pub fn enqueue(&self, event: ChangeEvent) -> SyncResult<()> {
        let file_id = event.file_id;
        self.queue.push(event).inspect_err(|e| {
            warn!(region_id = %self.region_id(), %file_id, "Change not queued: {e}");
        })
    }

    /// Re-queues locally pending records that are not already queued.
    ///
    /// Picks up writes that could not be queued earlier because the queue
    /// was full, and records whose events were dropped.
    pub fn requeue_pending(&self) -> SyncResult<usize> {
        let room = self.queue.capacity().saturating_sub(self.queue.len());
        if room == 0 {
            return Ok(0);
        }
        let mut queued = 0;
        for meta in self.store.list_by_state(SyncState::Pending, room)? {
            if self.queue.contains_file(&meta.id) {
                continue;
            }
            let change_type = if meta.is_tombstone() {
                ChangeType::Delete
            } else if meta.version <= 1 {
                ChangeType::Create
            } else {
                ChangeType::Update
            };
            match self.queue.push(ChangeEvent::new(change_type, &meta, self.region_id())) {
                Ok(()) => queued += 1,
                Err(SyncError::QueueFull { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        if queued > 0 {
            info!(region_id = %self.region_id(), "Re-queued {queued} pending changes");
        }
        Ok(queued)
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
        let timeout = self.config.request_timeout();
        tokio::time::timeout(timeout, fut)
            .await
            .unwrap_or(Err(SyncError::SyncTimeout(timeout)))
    }

    /// Sends one batch of up to `batch_size` queued events.
    ///
    /// Returns the number of events the coordinator acknowledged. On failure
    /// the batch has already been re-queued or dropped when this returns.
    pub async fn flush(&self) -> SyncResult<usize> {
        let batch = self.queue.pop_n(self.config.batch_size.max(1));
        self.deliver(batch).await
    }

    /// Flushes until the queue is empty or a delivery fails.
    pub async fn flush_all(&self) -> usize {
        let mut sent = 0;
        while !self.queue.is_empty() {
            match self.flush().await {
                Ok(n) => sent += n,
                Err(e) => {
                    warn!(region_id = %self.region_id(), "Flush interrupted: {e}");
                    break;
                }
            }
        }
        sent
    }

    async fn deliver(&self, batch: Vec<ChangeEvent>) -> SyncResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        match self.with_timeout(self.client.push_changes(&batch)).await {
            Ok(outcomes) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.touch_last_sync();
                Ok(self.record_outcomes(batch, outcomes))
            }
            Err(err) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                self.handle_failure(batch, &err);
                Err(err)
            }
        }
    }

    fn record_outcomes(&self, batch: Vec<ChangeEvent>, outcomes: Vec<EventOutcome>) -> usize {
        let mut by_id: HashMap<EventId, OutcomeStatus> =
            outcomes.into_iter().map(|o| (o.event_id, o.status)).collect();
        let mut acknowledged = 0;
        let mut unanswered = Vec::new();

        for event in batch {
            match by_id.remove(&event.id) {
                Some(status) if status.is_acknowledged() => {
                    acknowledged += 1;
                    self.mark_local(&event, SyncState::Synced);
                }
                Some(OutcomeStatus::Escalated) => {
                    acknowledged += 1;
                    Counters::bump(&self.counters.conflicts, 1);
                    warn!(file_id = %event.file_id, "Change escalated as a conflict");
                    self.mark_local(&event, SyncState::Conflict);
                }
                Some(OutcomeStatus::Rejected(reason)) => {
                    Counters::bump(&self.counters.rejected, 1);
                    error!(
                        event_id = %event.id,
                        file_id = %event.file_id,
                        "Change rejected by coordinator: {reason}"
                    );
                }
                Some(_) | None => unanswered.push(event),
            }
        }
        Counters::bump(&self.counters.sent, acknowledged as u64);

        if !unanswered.is_empty() {
            let err = SyncError::SyncFailed("no outcome reported for event".into());
            self.handle_failure(unanswered, &err);
        }
        acknowledged
    }

    /// Updates the local record's sync state if it still holds the version
    /// carried by `event`.
    fn mark_local(&self, event: &ChangeEvent, state: SyncState) {
        let result = self.store.get(&event.file_id).and_then(|found| match found {
            Some(mut meta) if meta.version == event.metadata.version => {
                meta.sync_state = state;
                self.store.save(&meta)
            }
            _ => Ok(()),
        });
        if let Err(e) = result {
            warn!(file_id = %event.file_id, "Failed to update local sync state: {e}");
        }
    }

    fn handle_failure(&self, batch: Vec<ChangeEvent>, err: &SyncError) {
        for mut event in batch {
            if !err.is_retryable() {
                Counters::bump(&self.counters.rejected, 1);
                error!(
                    event_id = %event.id,
                    file_id = %event.file_id,
                    "Dropping change after permanent failure: {err}"
                );
                continue;
            }

            event.attempts += 1;
            if event.attempts >= self.config.max_retries {
                Counters::bump(&self.counters.dropped, 1);
                error!(
                    event_id = %event.id,
                    file_id = %event.file_id,
                    attempts = event.attempts,
                    "Dropping change after exhausting retries: {err}"
                );
                continue;
            }

            let (event_id, attempts) = (event.id, event.attempts);
            match self.queue.push(event) {
                Ok(()) => {
                    Counters::bump(&self.counters.retried, 1);
                    warn!(%event_id, attempts, "Change delivery failed, will retry: {err}");
                }
                Err(_) => {
                    Counters::bump(&self.counters.dropped, 1);
                    error!(%event_id, attempts, "Dropping change: queue full on retry");
                }
            }
        }
    }

    fn current_backoff(&self) -> std::time::Duration {
        self.config
            .backoff(self.consecutive_failures.load(Ordering::Relaxed).max(1))
    }

    // ── Inbound ─────────────────────────────────────────────────

    /// Fetches pending changes from the coordinator and applies them.
    pub async fn pull(&self) -> SyncResult<usize> {
        let events = self.fetch_remote().await?;
        let n = events.len();
        for event in &events {
            if let Err(e) = self.apply_remote(event) {
                warn!(event_id = %event.id, file_id = %event.file_id, "Failed to apply remote change: {e}");
            }
        }
        Ok(n)
    }

    async fn fetch_remote(&self) -> SyncResult<Vec<ChangeEvent>> {
        let events = self
            .with_timeout(self.client.pull_changes(self.region_id()))
            .await?;
        Counters::bump(&self.counters.pulled, events.len() as u64);
        self.touch_last_sync();
        if !events.is_empty() {
            debug!(region_id = %self.region_id(), "Pulled {} remote changes", events.len());
        }
        Ok(events)
    }

    /// Applies one change received from the coordinator to local metadata.
    pub fn apply_remote(&self, event: &ChangeEvent) -> SyncResult<ApplyOutcome> {
        let incoming = &event.metadata;
        if incoming.id != event.file_id || incoming.vector_clock != event.vector_clock {
            return Err(SyncError::InvalidMetadata(format!(
                "event {} snapshot does not match its header",
                event.id
            )));
        }
        let deleted = event.change_type == ChangeType::Delete || incoming.is_tombstone();

        let Some(local) = self.store.get(&event.file_id)? else {
            let mut meta = incoming.clone();
            meta.local_state = if deleted { LocalState::Deleted } else { LocalState::Pending };
            meta.sync_state = SyncState::Synced;
            self.store.save(&meta)?;
            return Ok(ApplyOutcome::Inserted);
        };

        match local.vector_clock.compare(&event.vector_clock) {
            CausalOrder::Before => {
                let mut meta = incoming.clone();
                meta.local_state = content_state(&local, &meta, deleted);
                meta.sync_state = SyncState::Synced;
                self.store.save(&meta)?;
                Ok(ApplyOutcome::Replaced)
            }
            CausalOrder::After | CausalOrder::Equal => Ok(ApplyOutcome::Ignored),
            CausalOrder::Concurrent => {
                let Some(mut conflict) = self.resolver.detect(
                    &GlobalFileMetadata::new(local.clone()),
                    &GlobalFileMetadata::new(incoming.clone()),
                ) else {
                    return Ok(ApplyOutcome::Ignored);
                };
                Counters::bump(&self.counters.conflicts, 1);
                let resolution = self.resolver.resolve(&mut conflict, None)?;
                self.apply_resolution(&local, resolution)
            }
        }
    }

    /// Stores a resolution and queues its result so the coordinator
    /// converges on it.
    fn apply_resolution(&self, local: &FileMetadata, resolution: Resolution) -> SyncResult<ApplyOutcome> {
        let Some(result) = resolution.result else {
            let mut meta = local.clone();
            meta.sync_state = SyncState::Conflict;
            self.store.save(&meta)?;
            return Ok(ApplyOutcome::Escalated);
        };

        let mut file = result.file;
        let deleted = file.is_tombstone();
        file.local_state = content_state(local, &file, deleted);
        file.sync_state = SyncState::Pending;
        self.store.save(&file)?;
        let change_type = if deleted { ChangeType::Delete } else { ChangeType::Update };
        self.queue_or_defer(ChangeEvent::new(change_type, &file, self.region_id()));

        if let Some(forked) = resolution.forked {
            let mut copy = forked.file;
            copy.local_state = LocalState::Pending;
            copy.sync_state = SyncState::Pending;
            self.store.save(&copy)?;
            self.queue_or_defer(ChangeEvent::new(ChangeType::Create, &copy, self.region_id()));
        }
        Ok(ApplyOutcome::Resolved(resolution.strategy))
    }

    fn queue_or_defer(&self, event: ChangeEvent) {
        // The record stays pending and is picked up by requeue_pending.
        let _ = self.enqueue(event);
    }

    // ── Recovery ────────────────────────────────────────────────

    /// Reconciles with the coordinator after a partition heals.
    ///
    /// Remote changes are fetched first, then local queued changes are
    /// gathered and checked against them. Conflicts are resolved before
    /// anything else is applied, so a losing version never overwrites a
    /// winning one. Remaining remote changes are applied and remaining
    /// local changes pushed last.
    pub async fn recover(&self) -> SyncResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        info!(region_id = %self.region_id(), "Starting reconnection recovery");

        let remote = self.fetch_remote().await?;
        report.fetched = remote.len();

        let local = self.queue.drain_all();
        report.local_pending = local.len();

        let conflicts = {
            let mut latest_local: HashMap<FileId, &FileMetadata> = HashMap::new();
            for event in &local {
                latest_local.insert(event.file_id, &event.metadata);
            }
            let mut latest_remote: HashMap<FileId, &FileMetadata> = HashMap::new();
            for event in &remote {
                latest_remote.insert(event.file_id, &event.metadata);
            }

            let mut found = Vec::new();
            for (file_id, remote_meta) in &latest_remote {
                let Some(local_meta) = latest_local.get(file_id) else {
                    continue;
                };
                if let Some(conflict) = self.resolver.detect(
                    &GlobalFileMetadata::new((*local_meta).clone()),
                    &GlobalFileMetadata::new((*remote_meta).clone()),
                ) {
                    found.push(conflict);
                }
            }
            found
        };
        report.conflicts = conflicts.len();
        Counters::bump(&self.counters.conflicts, conflicts.len() as u64);

        // From here on nothing returns early: the drained local events
        // always go back to the queue.
        let mut handled: HashSet<FileId> = HashSet::new();
        let mut superseded: HashSet<FileId> = HashSet::new();
        for mut conflict in conflicts {
            let file_id = conflict.file_id;
            match self.settle(&mut conflict) {
                Ok(ApplyOutcome::Escalated) => {
                    handled.insert(file_id);
                    report.escalated += 1;
                }
                Ok(_) => {
                    handled.insert(file_id);
                    superseded.insert(file_id);
                    report.resolved += 1;
                }
                Err(e) => warn!(%file_id, "Failed to resolve conflict during recovery: {e}"),
            }
        }

        for event in &remote {
            if handled.contains(&event.file_id) {
                continue;
            }
            match self.apply_remote(event) {
                Ok(ApplyOutcome::Ignored) => {}
                Ok(_) => report.applied += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(event_id = %event.id, "Failed to apply remote change: {e}");
                }
            }
        }

        let kept: Vec<ChangeEvent> = local
            .into_iter()
            .filter(|event| !superseded.contains(&event.file_id))
            .collect();
        for event in self.queue.restore(kept) {
            Counters::bump(&self.counters.dropped, 1);
            error!(
                region_id = %self.region_id(),
                event_id = %event.id,
                "Dropping local change during recovery: queue full"
            );
        }
        report.pushed = self.flush_all().await;

        info!(region_id = %self.region_id(), ?report, "Recovery complete");
        Ok(report)
    }

    fn settle(&self, conflict: &mut Conflict) -> SyncResult<ApplyOutcome> {
        let current = match self.store.get(&conflict.file_id)? {
            Some(meta) => meta,
            None => conflict.local.file.clone(),
        };
        let resolution = self.resolver.resolve(conflict, None)?;
        self.apply_resolution(&current, resolution)
    }

    // ── Liveness ────────────────────────────────────────────────

    /// Reports this region's status, with queue depth as sync lag.
    pub async fn heartbeat(&self) -> SyncResult<()> {
        let depth = self.queue.len();
        let mut status = RegionStatus::healthy();
        status.sync_lag = i64::try_from(depth).unwrap_or(i64::MAX);
        status.load_level = depth as f64 / self.queue.capacity().max(1) as f64;
        self.with_timeout(self.client.heartbeat(self.region_id(), &status))
            .await
    }

    // ── Background loops ────────────────────────────────────────

    /// Starts the delivery loop for the configured mode.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) -> TaskHandle {
        let agent = Arc::clone(self);
        TaskHandle::spawn("sync-agent", parent, move |token| async move {
            agent.run(token).await;
        })
    }

    /// Starts a loop sending a heartbeat every `heartbeat_interval_ms`.
    pub fn start_heartbeat(self: &Arc<Self>, parent: &CancellationToken) -> TaskHandle {
        let agent = Arc::clone(self);
        TaskHandle::spawn("heartbeat", parent, move |token| async move {
            let mut ticker = delayed_interval(agent.config.heartbeat_interval());
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = agent.heartbeat().await {
                    warn!(region_id = %agent.region_id(), "Heartbeat failed: {e}");
                }
            }
        })
    }

    async fn run(&self, token: CancellationToken) {
        info!(region_id = %self.region_id(), mode = ?self.config.mode, "Sync agent started");
        match self.config.mode {
            SyncMode::Push => self.run_push(&token).await,
            SyncMode::Batch | SyncMode::Pull => self.run_interval(&token).await,
        }
        info!(region_id = %self.region_id(), "Sync agent stopped");
    }

    async fn run_push(&self, token: &CancellationToken) {
        while !token.is_cancelled() {
            let wait = match self.queue.pop() {
                Some(event) => match self.deliver(vec![event]).await {
                    Ok(_) => continue,
                    Err(_) => self.current_backoff(),
                },
                None => self.config.idle_poll(),
            };
            if !sleep_or_cancel(token, wait).await {
                break;
            }
        }
    }

    async fn run_interval(&self, token: &CancellationToken) {
        let mut ticker = delayed_interval(self.config.batch_interval());
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.config.mode == SyncMode::Pull {
                if let Err(e) = self.pull().await {
                    warn!(region_id = %self.region_id(), "Pull failed: {e}");
                }
            }
            if self.flush().await.is_err() && !sleep_or_cancel(token, self.current_backoff()).await {
                break;
            }
        }
    }
}

/// Local content state for `incoming` replacing `local`: content stays
/// present only when it is already held and unchanged.
fn content_state(local: &FileMetadata, incoming: &FileMetadata, deleted: bool) -> LocalState {
    if deleted {
        LocalState::Deleted
    } else if local.local_state == LocalState::Present && local.content_hash == incoming.content_hash {
        LocalState::Present
    } else {
        LocalState::Pending
    }
}
