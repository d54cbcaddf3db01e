//! Service wrapper for regionsync.
//!
//! A node runs in one of two roles:
//!
//! - **coordinator**: hosts the global metadata, the sync engine and the
//!   region registry behind an HTTP API
//! - **region**: serves local file operations and runs a sync agent that
//!   talks to the coordinator over HTTP
//!
//! Configuration comes from a single TOML file, see [`NodeConfig`].

pub mod api;
pub mod client;
pub mod config;
pub mod logging;

pub use client::HttpCoordinatorClient;
pub use config::{
    CoordinatorEndpoint, LogFormat, LoggerConfig, NodeConfig, RegionConfig, ServerConfig,
};
