//! Coordinator-side sync engine.
//!
//! Applies change events from regions to the global metadata manager and
//! fans accepted changes out to the other regions. Under the eager
//! strategy an accepted change is appended to every other region's pending
//! list immediately; under lazy and on-demand it goes to a
//! sequence-numbered log that regions consume through a cursor when they
//! poll.

use crate::config::{EngineConfig, SyncStrategy};
use crate::conflict::{Conflict, ConflictResolver, ConflictStatus, Resolution, Side};
use crate::coordinator::{GlobalMetadataManager, UpdateOutcome};
use crate::protocol::OutcomeStatus;
use crate::task::{TaskHandle, delayed_interval};
use crate::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use regionsync_types::{
    ChangeEvent, ChangeType, ConflictId, EventId, GlobalFileMetadata, RegionId, ReplicationState,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-region delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionState {
    pub last_event_id: Option<EventId>,
    pub last_sync_at: DateTime<Utc>,
    /// Next change-log sequence number to deliver.
    pub cursor: u64,
    /// Events queued by eager fan-out.
    pub pending: Vec<ChangeEvent>,
    /// Flagged by maintenance for not syncing within `stale_after_ms`.
    ///
    /// Stale regions are kept. Until one polls again or is unregistered,
    /// its `pending` list keeps growing and its cursor holds back log
    /// trimming.
    pub stale: bool,
}

#[derive(Debug)]
struct LogEntry {
    seq: u64,
    event: ChangeEvent,
}

#[derive(Debug, Default)]
struct EngineState {
    regions: HashMap<RegionId, RegionState>,
    log: VecDeque<LogEntry>,
    next_seq: u64,
}

impl EngineState {
    /// Logged events at or after `cursor` that `region` did not originate.
    fn undelivered(&self, region: &RegionId, cursor: u64) -> usize {
        self.log
            .iter()
            .filter(|e| e.seq >= cursor && &e.event.region_id != region)
            .count()
    }
}

/// Receives region changes, applies them and distributes them.
pub struct SyncEngine {
    config: EngineConfig,
    manager: Arc<dyn GlobalMetadataManager>,
    resolver: ConflictResolver,
    state: RwLock<EngineState>,
    conflicts: RwLock<Vec<Conflict>>,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        manager: Arc<dyn GlobalMetadataManager>,
        resolver: ConflictResolver,
    ) -> Self {
        Self {
            config,
            manager,
            resolver,
            state: RwLock::new(EngineState::default()),
            conflicts: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<dyn GlobalMetadataManager> {
        &self.manager
    }

    async fn write_state(&self) -> SyncResult<RwLockWriteGuard<'_, EngineState>> {
        let timeout = self.config.broadcast_timeout();
        tokio::time::timeout(timeout, self.state.write())
            .await
            .map_err(|_| SyncError::SyncTimeout(timeout))
    }

    // ── Regions ─────────────────────────────────────────────────

    /// Starts tracking a region. It receives changes accepted from now on.
    pub async fn register_region(&self, region: RegionId) -> SyncResult<()> {
        let mut state = self.write_state().await?;
        if state.regions.contains_key(&region) {
            return Err(SyncError::AlreadyExists(format!("region {region}")));
        }
        let cursor = state.next_seq;
        state.regions.insert(
            region.clone(),
            RegionState {
                last_event_id: None,
                last_sync_at: Utc::now(),
                cursor,
                pending: Vec::new(),
                stale: false,
            },
        );
        debug!(region_id = %region, cursor, "Region added to sync engine");
        Ok(())
    }

    /// Stops tracking a region, discarding its undelivered changes.
    ///
    /// Returns how many changes were discarded.
    pub async fn unregister_region(&self, region: &RegionId) -> SyncResult<usize> {
        let mut state = self.write_state().await?;
        let removed = state
            .regions
            .remove(region)
            .ok_or_else(|| SyncError::NotFound(format!("region {region}")))?;
        let discarded = removed.pending.len() + state.undelivered(region, removed.cursor);
        if discarded > 0 {
            warn!(region_id = %region, discarded, "Discarding undelivered changes of removed region");
        }
        Ok(discarded)
    }

    /// Registered regions, sorted.
    pub async fn regions(&self) -> Vec<RegionId> {
        let mut ids: Vec<_> = self.state.read().await.regions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn region_state(&self, region: &RegionId) -> SyncResult<RegionState> {
        self.state
            .read()
            .await
            .regions
            .get(region)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("region {region}")))
    }

    /// Number of changes awaiting delivery to `region`.
    pub async fn pending_count(&self, region: &RegionId) -> SyncResult<usize> {
        let state = self.state.read().await;
        let rs = state
            .regions
            .get(region)
            .ok_or_else(|| SyncError::NotFound(format!("region {region}")))?;
        Ok(rs.pending.len() + state.undelivered(region, rs.cursor))
    }

    /// Entries currently held in the change log.
    pub async fn log_len(&self) -> usize {
        self.state.read().await.log.len()
    }

    // ── Change handling ─────────────────────────────────────────

    /// Applies a change and distributes it if accepted.
    ///
    /// An update concurrent with the stored version fails with
    /// [`SyncError::Conflict`]; nothing is overwritten.
    pub async fn handle_change(&self, event: ChangeEvent) -> SyncResult<UpdateOutcome> {
        validate(&event)?;
        let outcome = self.apply(&event).await?;
        if outcome == UpdateOutcome::Applied {
            self.distribute(event).await?;
        }
        Ok(outcome)
    }

    /// Like [`handle_change`](Self::handle_change), but settles conflicts
    /// with the resolver's default strategy.
    ///
    /// A resolved result is stored and delivered to every region, the
    /// source included. Manual conflicts are kept until
    /// [`resolve_conflict`](Self::resolve_conflict) is called.
    pub async fn handle_change_resolving(&self, event: ChangeEvent) -> SyncResult<OutcomeStatus> {
        validate(&event)?;
        match self.apply(&event).await {
            Ok(UpdateOutcome::Applied) => {
                self.distribute(event).await?;
                Ok(OutcomeStatus::Applied)
            }
            Ok(UpdateOutcome::Stale) => Ok(OutcomeStatus::Stale),
            Err(SyncError::Conflict { .. }) => self.resolve_incoming(event).await,
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, event: &ChangeEvent) -> SyncResult<UpdateOutcome> {
        let manager = &self.manager;
        let file = event.metadata.clone();
        match event.change_type {
            ChangeType::Create => match manager.register(file.clone()).await {
                Ok(_) => Ok(UpdateOutcome::Applied),
                // Redelivery of an accepted create.
                Err(SyncError::AlreadyExists(_)) => manager.update(file, &event.region_id).await,
                Err(e) => Err(e),
            },
            ChangeType::Update => match manager.update(file.clone(), &event.region_id).await {
                // The region coalesced the create while disconnected.
                Err(SyncError::NotFound(_)) => manager.register(file).await.map(|_| UpdateOutcome::Applied),
                other => other,
            },
            ChangeType::Delete => {
                match manager
                    .delete(&event.file_id, &event.vector_clock, &event.region_id)
                    .await
                {
                    Err(SyncError::NotFound(_)) => manager.register(file).await.map(|_| UpdateOutcome::Applied),
                    other => other,
                }
            }
        }
    }

    async fn distribute(&self, event: ChangeEvent) -> SyncResult<()> {
        let mut state = self.write_state().await?;
        match self.config.strategy {
            SyncStrategy::Eager => {
                let mut targets = 0;
                for (region, rs) in &mut state.regions {
                    if region != &event.region_id {
                        rs.pending.push(event.clone());
                        targets += 1;
                    }
                }
                debug!(event_id = %event.id, file_id = %event.file_id, targets, "Fanned out change");
            }
            SyncStrategy::Lazy | SyncStrategy::OnDemand => {
                let seq = state.next_seq;
                state.next_seq += 1;
                debug!(event_id = %event.id, seq, "Logged change");
                state.log.push_back(LogEntry { seq, event });
            }
        }
        Ok(())
    }

    async fn resolve_incoming(&self, event: ChangeEvent) -> SyncResult<OutcomeStatus> {
        let stored = self.manager.get(&event.file_id).await?;
        let incoming = GlobalFileMetadata::new(event.metadata.clone());
        let Some(mut conflict) = self.resolver.detect(&stored, &incoming) else {
            // The stored version moved on since the rejected write.
            return self.handle_change(event).await.map(|outcome| match outcome {
                UpdateOutcome::Applied => OutcomeStatus::Applied,
                UpdateOutcome::Stale => OutcomeStatus::Stale,
            });
        };

        let resolution = self.resolver.resolve(&mut conflict, None)?;
        if conflict.status == ConflictStatus::Escalated {
            warn!(conflict_id = %conflict.id, file_id = %conflict.file_id, "Conflict awaiting manual resolution");
            self.conflicts.write().await.push(conflict);
            return Ok(OutcomeStatus::Escalated);
        }
        self.publish_resolution(resolution).await?;
        Ok(OutcomeStatus::Resolved)
    }

    async fn publish_resolution(&self, resolution: Resolution) -> SyncResult<()> {
        let coordinator = RegionId::coordinator();
        if let Some(result) = resolution.result {
            let change_type = if result.is_tombstone() {
                ChangeType::Delete
            } else {
                ChangeType::Update
            };
            let event = ChangeEvent::new(change_type, &result.file, &coordinator);
            self.manager.put_resolved(result).await?;
            self.distribute(event).await?;
        }
        if let Some(forked) = resolution.forked {
            let event = ChangeEvent::new(ChangeType::Create, &forked.file, &coordinator);
            self.manager.put_resolved(forked).await?;
            self.distribute(event).await?;
        }
        info!(
            conflict_id = %resolution.conflict_id,
            strategy = ?resolution.strategy,
            "Published conflict resolution"
        );
        Ok(())
    }

    // ── Conflicts ───────────────────────────────────────────────

    /// Conflicts awaiting manual resolution.
    pub async fn pending_conflicts(&self) -> Vec<Conflict> {
        self.conflicts.read().await.clone()
    }

    /// Settles an escalated conflict in favour of `side` and distributes
    /// the result.
    pub async fn resolve_conflict(&self, id: &ConflictId, side: Side) -> SyncResult<Resolution> {
        let (idx, conflict) = {
            let mut conflicts = self.conflicts.write().await;
            let idx = conflicts
                .iter()
                .position(|c| &c.id == id)
                .ok_or_else(|| SyncError::NotFound(format!("conflict {id}")))?;
            (idx, conflicts.remove(idx))
        };

        match self.settle(conflict.clone(), side).await {
            Ok(resolution) => Ok(resolution),
            Err(e) => {
                warn!(conflict_id = %id, "Manual resolution failed, conflict kept: {e}");
                let mut conflicts = self.conflicts.write().await;
                let idx = idx.min(conflicts.len());
                conflicts.insert(idx, conflict);
                Err(e)
            }
        }
    }

    async fn settle(&self, mut conflict: Conflict, side: Side) -> SyncResult<Resolution> {
        let mut resolution = self.resolver.accept(&mut conflict, side)?;

        // Later accepted writes must not be left causally ahead of the decision.
        if let Some(result) = resolution.result.as_mut() {
            let current = self.manager.get(&result.id()).await?;
            result.file.vector_clock.merge(current.vector_clock());
            result.file.version = result.file.version.max(current.version() + 1);
        }
        self.publish_resolution(resolution.clone()).await?;
        Ok(resolution)
    }

    // ── Delivery ────────────────────────────────────────────────

    /// Drains and returns the changes pending for `region`.
    ///
    /// This is a destructive read: the same changes are never returned
    /// twice. Fails with [`SyncError::NotFound`] for unknown regions.
    pub async fn get_pending_changes(&self, region: &RegionId) -> SyncResult<Vec<ChangeEvent>> {
        let strategy = self.config.strategy;
        let batch = self.config.batch_size.max(1);

        let (mut events, mut from_log) = {
            let mut guard = self.write_state().await?;
            let state = &mut *guard;
            let rs = state
                .regions
                .get_mut(region)
                .ok_or_else(|| SyncError::NotFound(format!("region {region}")))?;

            let pending = std::mem::take(&mut rs.pending);
            let mut from_log = Vec::new();
            if strategy != SyncStrategy::Eager {
                let mut cursor = rs.cursor;
                for entry in state.log.iter().skip_while(|e| e.seq < rs.cursor) {
                    if from_log.len() >= batch {
                        break;
                    }
                    cursor = entry.seq + 1;
                    if &entry.event.region_id != region {
                        from_log.push(entry.event.clone());
                    }
                }
                rs.cursor = cursor;
            }
            rs.last_sync_at = Utc::now();
            rs.stale = false;
            (pending, from_log)
        };

        if strategy == SyncStrategy::OnDemand {
            let mut held = Vec::with_capacity(from_log.len());
            for event in from_log {
                match self.manager.get_locations(&event.file_id).await {
                    Ok(locations) if locations.iter().any(|l| &l.region_id == region) => {
                        held.push(event);
                    }
                    _ => debug!(region_id = %region, file_id = %event.file_id, "Skipping change for file not held by region"),
                }
            }
            from_log = held;
        }
        events.append(&mut from_log);

        if let Some(last) = events.last() {
            if let Some(rs) = self.state.write().await.regions.get_mut(region) {
                rs.last_event_id = Some(last.id);
            }
        }
        for event in &events {
            if let Err(e) = self
                .manager
                .record_location(&event.file_id, region, ReplicationState::Syncing)
                .await
            {
                debug!(file_id = %event.file_id, "Could not record location: {e}");
            }
        }
        Ok(events)
    }

    // ── Maintenance ─────────────────────────────────────────────

    /// Flags regions that have not synced within `stale_after_ms` and trims
    /// log entries every region has consumed. Returns the newly stale
    /// regions. Regions are never evicted, so the log is only trimmed up to
    /// the slowest registered cursor.
    pub async fn maintenance_at(&self, now: DateTime<Utc>) -> Vec<RegionId> {
        let stale_after = self.config.stale_after();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let mut newly_stale = Vec::new();
        for (id, rs) in &mut state.regions {
            let idle = now - rs.last_sync_at;
            if idle > stale_after && !rs.stale {
                rs.stale = true;
                warn!(region_id = %id, "Region has not synced for {}s", idle.num_seconds());
                newly_stale.push(id.clone());
            }
        }

        let low_water = state
            .regions
            .values()
            .map(|r| r.cursor)
            .min()
            .unwrap_or(state.next_seq);
        while state.log.front().is_some_and(|e| e.seq < low_water) {
            state.log.pop_front();
        }
        newly_stale
    }

    /// Starts the periodic maintenance loop.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) -> TaskHandle {
        let engine = Arc::clone(self);
        TaskHandle::spawn("sync-maintenance", parent, move |token| async move {
            let mut ticker = delayed_interval(engine.config.maintenance_interval());
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                engine.maintenance_at(Utc::now()).await;
            }
        })
    }
}

fn validate(event: &ChangeEvent) -> SyncResult<()> {
    if event.metadata.id != event.file_id {
        return Err(SyncError::InvalidMetadata(format!(
            "event {} targets file {} but carries metadata for {}",
            event.id, event.file_id, event.metadata.id
        )));
    }
    if event.metadata.vector_clock != event.vector_clock {
        return Err(SyncError::InvalidMetadata(format!(
            "event {} clock does not match its metadata",
            event.id
        )));
    }
    Ok(())
}
