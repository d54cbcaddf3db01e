//! Configuration for the sync components.
//!
//! Durations are expressed in milliseconds. Every struct deserialises with
//! defaults for missing fields.

use crate::conflict::ConflictStrategy;
use regionsync_types::RegionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the agent delivers queued changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Send each event as soon as it is queued.
    #[default]
    Push,
    /// Send up to `batch_size` events per interval.
    Batch,
    /// Batch outbound and additionally poll the coordinator each interval.
    Pull,
}

/// How the coordinator fans accepted changes out to regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Append to every other region's pending list immediately.
    Eager,
    /// Deliver from the change log when a region polls.
    #[default]
    Lazy,
    /// Like lazy, limited to files the region already holds.
    OnDemand,
}

/// Region-side agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub region_id: RegionId,
    pub mode: SyncMode,
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    pub retry_interval_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: u32,
    pub queue_capacity: usize,
    /// Push-mode sleep when the queue is empty.
    pub idle_poll_ms: u64,
    /// Upper bound on a single transmission.
    pub request_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            region_id: RegionId::default(),
            mode: SyncMode::Push,
            batch_size: 100,
            batch_interval_ms: 5_000,
            retry_interval_ms: 30_000,
            max_backoff_ms: 300_000,
            max_retries: 10,
            queue_capacity: 10_000,
            idle_poll_ms: 100,
            request_timeout_ms: 30_000,
            heartbeat_interval_ms: 10_000,
        }
    }
}

impl AgentConfig {
    /// Default configuration for a region.
    #[must_use]
    pub fn for_region(region_id: RegionId) -> Self {
        Self {
            region_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    #[must_use]
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Delay before retrying after the `attempts`-th failure:
    /// `retry_interval * 2^(attempts - 1)`, capped at `max_backoff_ms`.
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(31);
        let ms = self.retry_interval_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }
}

/// Coordinator-side sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub strategy: SyncStrategy,
    /// Maximum events handed out per poll under lazy and on-demand delivery.
    pub batch_size: usize,
    pub broadcast_timeout_ms: u64,
    pub stale_after_ms: u64,
    pub maintenance_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: SyncStrategy::Lazy,
            batch_size: 100,
            broadcast_timeout_ms: 10_000,
            stale_after_ms: 300_000,
            maintenance_interval_ms: 1_000,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// Age of a region's last sync beyond which it is flagged stale.
    #[must_use]
    pub fn stale_after(&self) -> chrono::TimeDelta {
        time_delta(self.stale_after_ms)
    }
}

/// Conflict resolution configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    pub default_strategy: ConflictStrategy,
}

/// Region registry health-check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub check_interval_ms: u64,
    pub degraded_after_ms: u64,
    pub offline_after_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 30_000,
            degraded_after_ms: 60_000,
            offline_after_ms: 300_000,
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    #[must_use]
    pub fn degraded_after(&self) -> chrono::TimeDelta {
        time_delta(self.degraded_after_ms)
    }

    #[must_use]
    pub fn offline_after(&self) -> chrono::TimeDelta {
        time_delta(self.offline_after_ms)
    }
}

fn time_delta(ms: u64) -> chrono::TimeDelta {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::TimeDelta::try_milliseconds)
        .unwrap_or(chrono::TimeDelta::MAX)
}
