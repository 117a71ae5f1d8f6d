//! Flat key-value storage under persistent drivers.
//!
//! Stores know nothing about paths or directories; `IndexedFileSystem`
//! synthesizes the hierarchy on top of plain get/set.

use async_trait::async_trait;
use std::sync::Arc;

use crate::vfs::error::FsResult;

/// Minimal async key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value; `None` if absent.
    async fn get_item(&self, key: &str) -> FsResult<Option<Vec<u8>>>;

    /// Insert or replace a value.
    async fn set_item(&self, key: &str, value: &[u8]) -> FsResult<()>;

    /// Remove a value. Removing a missing key is not an error.
    async fn remove_item(&self, key: &str) -> FsResult<()>;

    /// All keys currently stored.
    async fn keys(&self) -> FsResult<Vec<String>>;

    /// Release resources. Further calls may fail.
    async fn close(&self) -> FsResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    async fn get_item(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
        (**self).get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> FsResult<()> {
        (**self).set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> FsResult<()> {
        (**self).remove_item(key).await
    }

    async fn keys(&self) -> FsResult<Vec<String>> {
        (**self).keys().await
    }

    async fn close(&self) -> FsResult<()> {
        (**self).close().await
    }
}
