//! Coordinator side: global metadata, the sync engine and the region
//! registry, composed by [`Coordinator`].

mod engine;
mod metadata;
mod registry;

pub use engine::{RegionState, SyncEngine};
pub use metadata::{GlobalMetadataManager, InMemoryMetadataManager, UpdateOutcome};
pub use registry::{Capacity, GeoLocation, HealthState, RegionInfo, RegionRegistry, RegionStatus};

use crate::config::{ConflictConfig, EngineConfig, RegistryConfig};
use crate::conflict::{Conflict, ConflictResolver, Resolution, Side};
use crate::protocol::{EventOutcome, OutcomeStatus};
use crate::region::CoordinatorClient;
use crate::task::TaskHandle;
use crate::SyncResult;
use async_trait::async_trait;
use regionsync_types::{ChangeEvent, ConflictId, FileId, GlobalFileMetadata, RegionId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Background tasks of a running coordinator.
pub struct CoordinatorTasks {
    maintenance: TaskHandle,
    health: TaskHandle,
}

impl CoordinatorTasks {
    /// Stops both loops and waits for them to exit.
    pub async fn stop(self) {
        self.maintenance.stop().await;
        self.health.stop().await;
    }
}

/// The coordinator: registry, engine and metadata manager kept in step.
pub struct Coordinator {
    manager: Arc<dyn GlobalMetadataManager>,
    engine: Arc<SyncEngine>,
    registry: Arc<RegionRegistry>,
}

impl Coordinator {
    /// Creates a coordinator backed by an in-memory metadata manager.
    pub fn new(engine: EngineConfig, conflict: &ConflictConfig, registry: RegistryConfig) -> Self {
        Self::with_manager(engine, conflict, registry, Arc::new(InMemoryMetadataManager::new()))
    }

    pub fn with_manager(
        engine: EngineConfig,
        conflict: &ConflictConfig,
        registry: RegistryConfig,
        manager: Arc<dyn GlobalMetadataManager>,
    ) -> Self {
        let resolver = ConflictResolver::new(conflict);
        Self {
            engine: Arc::new(SyncEngine::new(engine, Arc::clone(&manager), resolver)),
            registry: Arc::new(RegionRegistry::new(registry)),
            manager,
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<RegionRegistry> {
        &self.registry
    }

    // ── Regions ─────────────────────────────────────────────────

    pub async fn register_region(&self, info: RegionInfo) -> SyncResult<RegionInfo> {
        let id = info.id.clone();
        let registered = self.registry.register(info).await?;
        if let Err(e) = self.engine.register_region(id.clone()).await {
            let _ = self.registry.deregister(&id).await;
            return Err(e);
        }
        Ok(registered)
    }

    /// Removes a region. Its undelivered changes are discarded; returns how
    /// many.
    pub async fn deregister_region(&self, id: &RegionId) -> SyncResult<usize> {
        self.registry.deregister(id).await?;
        let discarded = self.engine.unregister_region(id).await.unwrap_or(0);
        info!(region_id = %id, discarded, "Region removed");
        Ok(discarded)
    }

    pub async fn heartbeat(&self, id: &RegionId, status: RegionStatus) -> SyncResult<()> {
        self.registry.heartbeat(id, status).await
    }

    pub async fn region(&self, id: &RegionId) -> SyncResult<RegionInfo> {
        self.registry.get(id).await
    }

    pub async fn regions(&self) -> Vec<RegionInfo> {
        self.registry.list().await
    }

    // ── Changes ─────────────────────────────────────────────────

    /// Handles a batch of region changes, one outcome per event.
    ///
    /// Errors never fail the batch; they become `Rejected` outcomes.
    pub async fn submit_changes(&self, events: Vec<ChangeEvent>) -> Vec<EventOutcome> {
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            let event_id = event.id;
            let status = if !self.registry.contains(&event.region_id).await {
                OutcomeStatus::Rejected(format!("region {} is not registered", event.region_id))
            } else {
                match self.engine.handle_change_resolving(event).await {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(%event_id, "Change refused: {e}");
                        OutcomeStatus::Rejected(e.to_string())
                    }
                }
            };
            outcomes.push(EventOutcome::new(event_id, status));
        }
        outcomes
    }

    pub async fn pending_changes(&self, region: &RegionId) -> SyncResult<Vec<ChangeEvent>> {
        self.engine.get_pending_changes(region).await
    }

    pub async fn metadata(&self, id: &FileId) -> SyncResult<GlobalFileMetadata> {
        self.manager.get(id).await
    }

    pub async fn conflicts(&self) -> Vec<Conflict> {
        self.engine.pending_conflicts().await
    }

    pub async fn resolve_conflict(&self, id: &ConflictId, side: Side) -> SyncResult<Resolution> {
        self.engine.resolve_conflict(id, side).await
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Starts engine maintenance and registry health checks.
    pub fn start(&self, parent: &CancellationToken) -> CoordinatorTasks {
        CoordinatorTasks {
            maintenance: self.engine.start(parent),
            health: self.registry.start(parent),
        }
    }
}

/// In-process transport: a region talking to a coordinator in the same
/// process.
#[async_trait]
impl CoordinatorClient for Coordinator {
    async fn push_changes(&self, events: &[ChangeEvent]) -> SyncResult<Vec<EventOutcome>> {
        Ok(self.submit_changes(events.to_vec()).await)
    }

    async fn pull_changes(&self, region: &RegionId) -> SyncResult<Vec<ChangeEvent>> {
        self.pending_changes(region).await
    }

    async fn heartbeat(&self, region: &RegionId, status: &RegionStatus) -> SyncResult<()> {
        Coordinator::heartbeat(self, region, status.clone()).await
    }
}
