//! Durable key-value store on SQLite, and the local-storage drive built on it.
//!
//! One database file can host several drives: every key lives in a
//! namespace (the drive prefix), much like one browser origin's local
//! storage holds the tables of every drive it mounted.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

use super::indexed::{IndexedFileSystem, IndexedOptions};
use super::store::KvStore;
use crate::vfs::error::{FsError, FsResult};
use crate::vfs::path::normalize_prefix;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (namespace, key)
);
"#;

/// SQLite-backed key-value store.
///
/// rusqlite is blocking, so every call hops onto the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
    namespace: String,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>, namespace: impl Into<String>) -> FsResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, namespace)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory(namespace: impl Into<String>) -> FsResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, namespace)
    }

    fn from_connection(conn: Connection, namespace: impl Into<String>) -> FsResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            namespace: namespace.into(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> FsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let namespace = self.namespace.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard
                .as_ref()
                .ok_or_else(|| FsError::closed(format!("store {namespace}")))?;
            f(conn, &namespace).map_err(FsError::from)
        })
        .await?
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get_item(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.with_conn(move |conn, ns| {
            conn.query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![ns, key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> FsResult<()> {
        let key = key.to_string();
        let value = value.to_vec();
        self.with_conn(move |conn, ns| {
            conn.execute(
                "INSERT INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
                params![ns, key, value],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove_item(&self, key: &str) -> FsResult<()> {
        let key = key.to_string();
        self.with_conn(move |conn, ns| {
            conn.execute(
                "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                params![ns, key],
            )
            .map(|_| ())
        })
        .await
    }

    async fn keys(&self) -> FsResult<Vec<String>> {
        self.with_conn(|conn, ns| {
            let mut stmt = conn.prepare("SELECT key FROM kv WHERE namespace = ?1")?;
            let keys = stmt
                .query_map(params![ns], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn close(&self) -> FsResult<()> {
        // Other handles sharing the connection keep it alive.
        if Arc::strong_count(&self.conn) == 1 {
            self.conn.lock().take();
        }
        Ok(())
    }
}

/// Persistent-driver semantics over a durable SQLite store.
pub type LocalStorageFileSystem = IndexedFileSystem<SqliteStore>;

impl IndexedFileSystem<SqliteStore> {
    /// Open a local-storage drive in the database at `db_path`, namespaced by
    /// the lower-cased prefix.
    pub fn open(prefix: impl Into<String>, db_path: impl AsRef<Path>) -> FsResult<Self> {
        let prefix: String = prefix.into();
        let prefix = normalize_prefix(&prefix)?;
        let store = SqliteStore::open(db_path, prefix.clone())?;
        Ok(Self::with_store(prefix, store, IndexedOptions::default()))
    }

    /// Local-storage drive on an in-memory database.
    pub fn in_memory(prefix: impl Into<String>) -> FsResult<Self> {
        let prefix: String = prefix.into();
        let prefix = normalize_prefix(&prefix)?;
        let store = SqliteStore::in_memory(prefix.clone())?;
        Ok(Self::with_store(prefix, store, IndexedOptions::default()))
    }
}
