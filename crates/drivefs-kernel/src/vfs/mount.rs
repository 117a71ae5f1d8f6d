//! Drive-letter mount table.
//!
//! Maps prefixes (`c`, `w`, ...) to driver instances. The table owns the
//! drivers' lifecycle: `mount` runs `init()` before registering, `umount`
//! runs `uninit()` before removing.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{FsError, FsResult};
use super::ops::FileSystemDriver;
use super::path::normalize_prefix;
use super::types::MountInfo;

/// Prefixes `next_letter()` never hands out unless asked otherwise.
pub const DEFAULT_RESERVED: &[&str] = &["a", "b"];

/// One registered drive.
#[derive(Clone)]
pub struct MountRecord {
    pub prefix: String,
    pub driver: Arc<dyn FileSystemDriver>,
    pub remote: bool,
}

impl std::fmt::Debug for MountRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountRecord")
            .field("prefix", &self.prefix)
            .field("kind", &self.driver.kind())
            .field("remote", &self.remote)
            .finish()
    }
}

/// Registry of mounted drives, keyed by prefix.
pub struct MountTable {
    mounts: RwLock<BTreeMap<String, MountRecord>>,
    /// Prefixes whose `init()` is still running.
    pending: Mutex<BTreeSet<String>>,
    reserved: BTreeSet<String>,
    /// Serializes moves between drives; each holds a source path lock while
    /// it waits on the destination.
    transfers: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("mounts", &self.list())
            .field("reserved", &self.reserved)
            .finish()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears a pending prefix even if `mount` is cancelled mid-`init()`.
struct PendingGuard<'a> {
    pending: &'a Mutex<BTreeSet<String>>,
    prefix: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.prefix);
    }
}

impl MountTable {
    /// Empty table reserving [`DEFAULT_RESERVED`].
    pub fn new() -> Self {
        Self::with_reserved(DEFAULT_RESERVED.iter().copied())
    }

    /// Empty table with a custom reserved set.
    pub fn with_reserved<I, S>(reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            mounts: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(BTreeSet::new()),
            reserved: reserved
                .into_iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .collect(),
            transfers: tokio::sync::Mutex::new(()),
        }
    }

    /// Initialize a driver and register it under its prefix.
    pub async fn mount(&self, driver: impl FileSystemDriver + 'static) -> FsResult<()> {
        self.mount_arc(Arc::new(driver)).await
    }

    /// Initialize an already shared driver and register it.
    ///
    /// Nothing is registered if `init()` fails.
    #[tracing::instrument(skip(self, driver), fields(prefix = %driver.prefix()), name = "vfs.mount")]
    pub async fn mount_arc(&self, driver: Arc<dyn FileSystemDriver>) -> FsResult<()> {
        let prefix = normalize_prefix(driver.prefix())?;
        let _pending = {
            let mounts = self.mounts.read();
            let mut pending = self.pending.lock();
            if mounts.contains_key(&prefix) || pending.contains(&prefix) {
                return Err(FsError::prefix_in_use(&prefix));
            }
            pending.insert(prefix.clone());
            PendingGuard {
                pending: &self.pending,
                prefix: prefix.clone(),
            }
        };

        if let Err(e) = driver.init().await {
            warn!(prefix = %prefix, "mount failed: {e}");
            return Err(e);
        }

        let record = MountRecord {
            prefix: prefix.clone(),
            remote: driver.remote(),
            driver,
        };
        info!(prefix = %prefix, kind = ?record.driver.kind(), "mounted");
        self.mounts.write().insert(prefix, record);
        Ok(())
    }

    /// Uninitialize a driver and remove it.
    ///
    /// The record is removed even if `uninit()` reports a failed flush; the
    /// driver is closed either way.
    #[tracing::instrument(skip(self), name = "vfs.umount")]
    pub async fn umount(&self, prefix: &str) -> FsResult<()> {
        let prefix = normalize_prefix(prefix)?;
        let driver = self.get(&prefix)?;
        let result = driver.uninit().await;
        self.mounts.write().remove(&prefix);
        match &result {
            Ok(()) => info!(prefix = %prefix, "unmounted"),
            Err(e) => warn!(prefix = %prefix, "unmounted with error: {e}"),
        }
        result
    }

    /// Unmount every drive, returning the first error.
    pub async fn umount_all(&self) -> FsResult<()> {
        let mut first_err = None;
        for prefix in self.list() {
            if let Err(e) = self.umount(&prefix).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Driver mounted under `prefix`.
    pub fn get(&self, prefix: &str) -> FsResult<Arc<dyn FileSystemDriver>> {
        let prefix = normalize_prefix(prefix)?;
        self.mounts
            .read()
            .get(&prefix)
            .map(|record| Arc::clone(&record.driver))
            .ok_or_else(|| FsError::prefix_not_found(prefix))
    }

    pub fn is_mounted(&self, prefix: &str) -> bool {
        normalize_prefix(prefix).is_ok_and(|p| self.mounts.read().contains_key(&p))
    }

    /// Records of every mounted drive, ordered by prefix.
    pub fn records(&self) -> Vec<MountRecord> {
        self.mounts.read().values().cloned().collect()
    }

    /// Mounted drives, ordered by prefix.
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.mounts
            .read()
            .values()
            .map(|record| MountInfo {
                prefix: record.prefix.clone(),
                kind: record.driver.kind(),
                remote: record.remote,
                read_only: record.driver.read_only(),
            })
            .collect()
    }

    /// Mounted prefixes, ordered.
    pub fn list(&self) -> Vec<String> {
        self.mounts.read().keys().cloned().collect()
    }

    /// Held for the duration of a cross-drive move.
    pub(crate) async fn transfer_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.transfers.lock().await
    }

    /// First letter in `a..=z` that is neither reserved, mounted, nor mid-mount.
    pub fn next_letter(&self) -> Option<String> {
        let mounts = self.mounts.read();
        let pending = self.pending.lock();
        ('a'..='z')
            .map(String::from)
            .find(|l| !self.reserved.contains(l) && !mounts.contains_key(l) && !pending.contains(l))
    }
}
