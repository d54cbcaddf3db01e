//! Node configuration, read from one TOML file.
//!
//! Every section is optional and falls back to its defaults:
//!
//! ```toml
//! [region]
//! id = "eu-west"
//! name = "Europe West"
//! endpoint = "http://10.0.0.5:8081"
//!
//! [server]
//! bind = "0.0.0.0:8081"
//!
//! [storage]
//! type = "local_fs"
//! root = "/var/lib/regionsync/files"
//!
//! [metadata]
//! type = "sqlite"
//! path = "/var/lib/regionsync/metadata.db"
//!
//! [coordinator]
//! url = "http://coordinator:8080"
//!
//! [sync]
//! mode = "batch"
//! batch_interval_ms = 2000
//!
//! [logger]
//! level = "info"
//! format = "json"
//! ```

use regionsync_storage::{BackendKind, MetadataStoreKind};
use regionsync_sync::{
    AgentConfig, ConflictConfig, EngineConfig, RegistryConfig, SyncError, SyncResult,
};
use regionsync_types::RegionId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Identity a region node announces to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub id: RegionId,
    pub name: String,
    /// URL other parties use to reach this node.
    pub endpoint: String,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            id: RegionId::default(),
            name: "local".to_string(),
            endpoint: "http://127.0.0.1:8081".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Where a region node finds its coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorEndpoint {
    pub url: String,
}

impl Default for CoordinatorEndpoint {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub region: RegionConfig,
    pub server: ServerConfig,
    pub storage: BackendKind,
    pub metadata: MetadataStoreKind,
    pub coordinator: CoordinatorEndpoint,
    /// Agent settings. `region_id` is taken from `[region]`.
    pub sync: AgentConfig,
    pub engine: EngineConfig,
    pub conflict: ConflictConfig,
    pub registry: RegistryConfig,
    pub logger: LoggerConfig,
}

impl NodeConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> SyncResult<Self> {
        toml::from_str(raw).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Agent configuration for this node's region.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            region_id: self.region.id.clone(),
            ..self.sync.clone()
        }
    }

    /// Rejects settings the components cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if RegionId::new(self.region.id.as_str()).is_err() {
            return Err(invalid(format!("region.id {:?} is not a valid region id", self.region.id.as_str())));
        }
        if self.region.id.is_coordinator() {
            return Err(invalid("region.id is reserved for the coordinator"));
        }
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(format!("server.bind {:?} is not a socket address", self.server.bind)));
        }
        if self.sync.batch_size == 0 {
            return Err(invalid("sync.batch_size must be at least 1"));
        }
        if self.sync.queue_capacity == 0 {
            return Err(invalid("sync.queue_capacity must be at least 1"));
        }
        if self.sync.max_retries == 0 {
            return Err(invalid("sync.max_retries must be at least 1"));
        }
        if self.engine.batch_size == 0 {
            return Err(invalid("engine.batch_size must be at least 1"));
        }
        if self.registry.degraded_after_ms >= self.registry.offline_after_ms {
            return Err(invalid("registry.degraded_after_ms must be below offline_after_ms"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> SyncError {
    SyncError::Config(msg.into())
}
