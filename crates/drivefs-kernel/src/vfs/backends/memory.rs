//! In-process key-value store and the RAM drive built on it.
//!
//! All data is ephemeral and disappears with the process.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::indexed::{IndexedFileSystem, IndexedOptions};
use super::store::KvStore;
use crate::vfs::error::FsResult;

/// Ephemeral key-value store.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_item(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
        Ok(self.items.read().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> FsResult<()> {
        self.items.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> FsResult<()> {
        self.items.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> FsResult<Vec<String>> {
        Ok(self.items.read().keys().cloned().collect())
    }
}

/// Persistent-driver semantics over an in-process store.
pub type RamFileSystem = IndexedFileSystem<MemoryStore>;

impl IndexedFileSystem<MemoryStore> {
    /// Create a RAM drive with default options.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_store(prefix, MemoryStore::new(), IndexedOptions::default())
    }
}
