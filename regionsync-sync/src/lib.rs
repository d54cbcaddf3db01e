//! Cross-region synchronization engine for regionsync.
//!
//! Regions operate autonomously and converge through asynchronous,
//! causally-tracked change propagation via a central coordinator.
//!
//! # Architecture
//!
//! ## Region side
//!
//! - **ChangeQueue**: bounded FIFO of change events awaiting delivery
//! - **SyncAgent**: drains the queue (push, batch or pull mode) with
//!   bounded retry and backoff, applies inbound changes and recovers after
//!   a partition
//! - **FileService**: local file operations that feed the agent
//!
//! ## Coordinator side
//!
//! - **GlobalMetadataManager**: authoritative metadata with compare-and-set
//!   updates keyed on vector clocks
//! - **SyncEngine**: applies incoming changes and fans them out to the
//!   other regions (eager, lazy or on-demand)
//! - **RegionRegistry**: region liveness driven by heartbeat recency
//!
//! Both sides share the **ConflictResolver**, which only ever treats
//! concurrent clocks as a conflict.
//!
//! # Example
//!
//! ```
//! use regionsync_sync::{ChangeQueue, SyncError};
//! use regionsync_types::{ChangeEvent, ChangeType, FileMetadata, RegionId};
//!
//! let region = RegionId::new("eu-west").unwrap();
//! let mut meta = FileMetadata::new(region.clone(), "/a.txt", "a.txt");
//! meta.record_mutation(&region);
//!
//! let queue = ChangeQueue::new(1);
//! queue.push(ChangeEvent::new(ChangeType::Create, &meta, &region)).unwrap();
//! let overflow = queue.push(ChangeEvent::new(ChangeType::Update, &meta, &region));
//! assert!(matches!(overflow, Err(SyncError::QueueFull { capacity: 1 })));
//! ```

pub mod config;
pub mod conflict;
pub mod coordinator;
mod error;
pub mod protocol;
pub mod region;
mod task;

pub use config::{AgentConfig, ConflictConfig, EngineConfig, RegistryConfig, SyncMode, SyncStrategy};
pub use conflict::{
    Conflict, ConflictResolver, ConflictStatus, ConflictStrategy, FieldMerge, LWW_TIE_WINNER,
    MergeHandler, Resolution, Side,
};
pub use coordinator::{
    Capacity, Coordinator, CoordinatorTasks, GeoLocation, GlobalMetadataManager, HealthState,
    InMemoryMetadataManager, RegionInfo, RegionRegistry, RegionState, RegionStatus, SyncEngine,
    UpdateOutcome,
};
pub use error::{SyncError, SyncResult};
pub use protocol::{EventOutcome, OutcomeStatus};
pub use region::{
    AgentStats, ApplyOutcome, ChangeQueue, CoordinatorClient, FileService, RecoveryReport,
    SyncAgent,
};
pub use task::TaskHandle;
