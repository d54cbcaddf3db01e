//! Local collaborators of a regionsync region.
//!
//! Two capabilities are defined here, each with a closed set of variants
//! chosen by an explicit factory:
//!
//! - [`StorageBackend`]: opaque file content addressed by key
//!   ([`LocalFsBackend`], [`MemoryBackend`])
//! - [`MetadataStore`]: the region's file metadata, queryable by id, path,
//!   directory and sync state ([`SqliteMetadataStore`],
//!   [`MemoryMetadataStore`])

mod backend;
mod error;
mod local_fs;
mod memory;
mod metadata_store;
mod sqlite_store;

pub use backend::{BackendKind, FileInfo, StorageBackend, open_backend};
pub use error::{StorageError, StorageResult};
pub use local_fs::LocalFsBackend;
pub use memory::{MemoryBackend, MemoryMetadataStore};
pub use metadata_store::{MetadataStore, MetadataStoreKind, open_metadata_store};
pub use sqlite_store::SqliteMetadataStore;
