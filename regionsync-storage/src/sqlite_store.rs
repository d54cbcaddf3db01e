//! SQLite-backed metadata store.
//!
//! Each record is kept as a JSON document alongside the columns needed for
//! lookups by path, directory and sync state.

use crate::metadata_store::normalize_dir;
use crate::{MetadataStore, StorageError, StorageResult};
use chrono::SecondsFormat;
use regionsync_types::{FileId, FileMetadata, SyncState};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Metadata store persisted in a SQLite file.
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Database(format!("failed to open metadata store: {e}")))?;
        debug!("Opened metadata store at {}", path.display());
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StorageError::Database(format!("failed to open in-memory metadata store: {e}"))
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                dir TEXT NOT NULL,
                deleted INTEGER NOT NULL,
                sync_state TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_path ON files(path);
            CREATE INDEX IF NOT EXISTS idx_files_dir ON files(dir);
            CREATE INDEX IF NOT EXISTS idx_files_sync_state ON files(sync_state, updated_at);
            ",
        )?;
        Ok(())
    }

    fn query_many(&self, sql: &str, params: impl rusqlite::Params) -> StorageResult<Vec<FileMetadata>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for data in rows {
            out.push(serde_json::from_str(&data?)?);
        }
        Ok(out)
    }

    fn query_one(&self, sql: &str, params: impl rusqlite::Params) -> StorageResult<Option<FileMetadata>> {
        let data: Option<String> = self
            .conn()?
            .query_row(sql, params, |row| row.get(0))
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(StorageError::from))
            .transpose()
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn get(&self, id: &FileId) -> StorageResult<Option<FileMetadata>> {
        self.query_one("SELECT data FROM files WHERE id = ?1", params![id.to_string()])
    }

    fn get_by_path(&self, path: &str) -> StorageResult<Option<FileMetadata>> {
        self.query_one(
            "SELECT data FROM files WHERE path = ?1 ORDER BY deleted ASC, updated_at DESC LIMIT 1",
            params![path],
        )
    }

    fn save(&self, metadata: &FileMetadata) -> StorageResult<()> {
        let data = serde_json::to_string(metadata)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO files (id, path, dir, deleted, sync_state, updated_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                metadata.id.to_string(),
                metadata.path,
                metadata.dir(),
                metadata.is_tombstone(),
                metadata.sync_state.as_str(),
                metadata.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                data,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &FileId) -> StorageResult<()> {
        let removed = self
            .conn()?
            .execute("DELETE FROM files WHERE id = ?1", params![id.to_string()])?;
        if removed == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<FileMetadata>> {
        self.query_many(
            "SELECT data FROM files WHERE dir = ?1 ORDER BY path",
            params![normalize_dir(dir)],
        )
    }

    fn list_by_state(&self, state: SyncState, limit: usize) -> StorageResult<Vec<FileMetadata>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_many(
            "SELECT data FROM files WHERE sync_state = ?1 ORDER BY updated_at ASC LIMIT ?2",
            params![state.as_str(), limit],
        )
    }
}
