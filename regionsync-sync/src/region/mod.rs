//! Region-side synchronization: the outbound queue, the delivery agent and
//! the file service that feeds them.

mod agent;
mod client;
mod queue;
mod service;

pub use agent::{AgentStats, ApplyOutcome, RecoveryReport, SyncAgent};
pub use client::CoordinatorClient;
#[doc(hidden)]
pub use client::mock;
pub use queue::ChangeQueue;
pub use service::{FileService, content_hash};
