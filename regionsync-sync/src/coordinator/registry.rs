//! Region liveness tracking.
//!
//! Regions move `healthy -> degraded -> offline` as their last heartbeat
//! ages, and return to health only through an explicit heartbeat.

use crate::config::RegistryConfig;
use crate::task::{TaskHandle, delayed_interval};
use crate::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use regionsync_types::RegionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Healthy,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub country: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

/// Status reported by a region, and updated by health checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionStatus {
    pub state: HealthState,
    /// Changes the region has yet to deliver.
    #[serde(default)]
    pub sync_lag: i64,
    #[serde(default)]
    pub load_level: f64,
    pub last_check_at: DateTime<Utc>,
}

impl RegionStatus {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            state: HealthState::Healthy,
            sync_lag: 0,
            load_level: 0.0,
            last_check_at: Utc::now(),
        }
    }
}

/// A region known to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub id: RegionId,
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub location: GeoLocation,
    #[serde(default)]
    pub capacity: Capacity,
    pub status: RegionStatus,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl RegionInfo {
    #[must_use]
    pub fn new(id: RegionId, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            endpoint: endpoint.into(),
            location: GeoLocation::default(),
            capacity: Capacity::default(),
            status: RegionStatus::healthy(),
            joined_at: now,
            last_seen_at: now,
        }
    }
}

/// Registry of regions and their health.
pub struct RegionRegistry {
    config: RegistryConfig,
    regions: RwLock<HashMap<RegionId, RegionInfo>>,
}

impl RegionRegistry {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            regions: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a region as healthy. Rejects duplicate ids.
    pub async fn register(&self, mut info: RegionInfo) -> SyncResult<RegionInfo> {
        let mut regions = self.regions.write().await;
        if regions.contains_key(&info.id) {
            return Err(SyncError::AlreadyExists(format!("region {}", info.id)));
        }
        let now = Utc::now();
        info.joined_at = now;
        info.last_seen_at = now;
        info.status.state = HealthState::Healthy;
        info.status.last_check_at = now;
        info!(region_id = %info.id, endpoint = %info.endpoint, "Region registered");
        regions.insert(info.id.clone(), info.clone());
        Ok(info)
    }

    /// Removes a region entirely.
    pub async fn deregister(&self, id: &RegionId) -> SyncResult<RegionInfo> {
        let removed = self
            .regions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SyncError::NotFound(format!("region {id}")))?;
        info!(region_id = %id, "Region deregistered");
        Ok(removed)
    }

    /// Records a heartbeat: `last_seen_at` becomes now and the reported
    /// status replaces the stored one verbatim.
    pub async fn heartbeat(&self, id: &RegionId, status: RegionStatus) -> SyncResult<()> {
        self.heartbeat_at(id, status, Utc::now()).await
    }

    pub async fn heartbeat_at(&self, id: &RegionId, status: RegionStatus, now: DateTime<Utc>) -> SyncResult<()> {
        let mut regions = self.regions.write().await;
        let info = regions
            .get_mut(id)
            .ok_or_else(|| SyncError::NotFound(format!("region {id}")))?;
        if info.status.state != status.state {
            info!(region_id = %id, from = ?info.status.state, to = ?status.state, "Region reported new state");
        }
        info.status = status;
        info.last_seen_at = now;
        Ok(())
    }

    pub async fn get(&self, id: &RegionId) -> SyncResult<RegionInfo> {
        self.regions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("region {id}")))
    }

    pub async fn contains(&self, id: &RegionId) -> bool {
        self.regions.read().await.contains_key(id)
    }

    /// All regions, sorted by id.
    pub async fn list(&self) -> Vec<RegionInfo> {
        self.filtered(|_| true).await
    }

    /// Regions that are not offline.
    pub async fn active_regions(&self) -> Vec<RegionInfo> {
        self.filtered(|s| s != HealthState::Offline).await
    }

    pub async fn healthy_regions(&self) -> Vec<RegionInfo> {
        self.filtered(|s| s == HealthState::Healthy).await
    }

    async fn filtered(&self, keep: impl Fn(HealthState) -> bool) -> Vec<RegionInfo> {
        let mut out: Vec<_> = self
            .regions
            .read()
            .await
            .values()
            .filter(|r| keep(r.status.state))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Applies the elapsed-time transition rule as of `now`.
    ///
    /// Returns every region whose state changed, with its new state.
    pub async fn check_health_at(&self, now: DateTime<Utc>) -> Vec<(RegionId, HealthState)> {
        let offline_after = self.config.offline_after();
        let degraded_after = self.config.degraded_after();
        let mut changed = Vec::new();

        let mut regions = self.regions.write().await;
        for info in regions.values_mut() {
            let elapsed = now - info.last_seen_at;
            let previous = info.status.state;
            if elapsed > offline_after {
                info.status.state = HealthState::Offline;
            } else if elapsed > degraded_after && previous == HealthState::Healthy {
                info.status.state = HealthState::Degraded;
            }
            info.status.last_check_at = now;

            if info.status.state != previous {
                warn!(
                    region_id = %info.id,
                    from = ?previous,
                    to = ?info.status.state,
                    "Region health changed after {}s without heartbeat",
                    elapsed.num_seconds()
                );
                changed.push((info.id.clone(), info.status.state));
            }
        }
        changed
    }

    pub async fn check_health(&self) -> Vec<(RegionId, HealthState)> {
        self.check_health_at(Utc::now()).await
    }

    /// Starts the periodic health check.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) -> TaskHandle {
        let registry = Arc::clone(self);
        TaskHandle::spawn("health-check", parent, move |token| async move {
            let mut ticker = delayed_interval(registry.config.check_interval());
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                registry.check_health().await;
            }
        })
    }
}
