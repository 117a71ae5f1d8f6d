//! Persistent driver over a flat key-value store.
//!
//! The store only offers get/set, so the hierarchy lives in an in-memory
//! file table (path → [`FileTableEntry`]) that is loaded on `init()` and
//! written back whole after every mutation. Directories are a derived view:
//! `readdir` is a parent-path match over the table keys.
//!
//! # Persisted layout
//!
//! ```text
//! filetable        JSON map of path → entry, in table order
//! record:<uuid>    content of one non-empty file
//! ```
//!
//! Content is stored before a table entry references it, and a table entry
//! is dropped (and flushed) before its content is deleted. Interrupting
//! either sequence can leave an unreferenced record, which the orphan sweep
//! in `init()` removes, but never an entry without content.
//!
//! # Locking
//!
//! Lock order is lifecycle gate → tree lock → path locks. File operations
//! hold the tree lock shared plus their own path locks; directory-scoped
//! operations (`rmdir`, `cpdir`, `mvdir`) hold the tree lock exclusively.
//! Parking-lot locks on the table are never held across an `.await`.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::future::Future;
use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::store::KvStore;
use crate::vfs::error::{BatchOutcome, FsError, FsResult};
use crate::vfs::lifecycle::{DriverState, Lifecycle, OpGuard};
use crate::vfs::locks::{PathGuard, PathLocks};
use crate::vfs::ops::FileSystemDriver;
use crate::vfs::path::{self, depth, is_within, normalize, parent_path, rebase};
use crate::vfs::types::{DriverKind, EntryType, FileTableEntry, Filetype, Stat, Usage};

/// Store key of the serialized file table.
pub const TABLE_KEY: &str = "filetable";

/// Prefix of content record keys.
pub const RECORD_PREFIX: &str = "record:";

/// Path → entry, in insertion order.
pub type FileTable = IndexMap<String, FileTableEntry>;

fn record_key(record_id: &str) -> String {
    format!("{RECORD_PREFIX}{record_id}")
}

fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn fresh_table() -> FileTable {
    let mut table = FileTable::new();
    table.insert("/".to_string(), FileTableEntry::directory());
    table
}

/// Driver options.
#[derive(Debug, Clone)]
pub struct IndexedOptions {
    /// `readdir` ordering: `true` sorts names lexicographically (byte order),
    /// `false` keeps table insertion order.
    pub sort_entries: bool,
    /// Reject every mutation.
    pub read_only: bool,
}

impl Default for IndexedOptions {
    fn default() -> Self {
        Self {
            sort_entries: true,
            read_only: false,
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    paused: bool,
    dirty: bool,
}

/// Held by file operations.
struct FileOp<'a> {
    _paths: PathGuard<'a>,
    _tree: RwLockReadGuard<'a, ()>,
    _op: OpGuard<'a>,
}

/// Held by directory-scoped operations.
struct TreeOp<'a> {
    _tree: RwLockWriteGuard<'a, ()>,
    _op: OpGuard<'a>,
}

/// Persistent driver: in-memory file table mirrored to a [`KvStore`].
pub struct IndexedFileSystem<S> {
    prefix: String,
    store: S,
    options: IndexedOptions,
    lifecycle: Lifecycle,
    table: RwLock<FileTable>,
    sync: Mutex<SyncState>,
    flush_lock: tokio::sync::Mutex<()>,
    tree: tokio::sync::RwLock<()>,
    locks: PathLocks,
}

impl<S> std::fmt::Debug for IndexedFileSystem<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedFileSystem")
            .field("prefix", &self.prefix)
            .field("state", &self.lifecycle.state())
            .field("entries", &self.table.read().len())
            .finish()
    }
}

impl<S: KvStore + 'static> IndexedFileSystem<S> {
    /// Create a driver over an arbitrary store.
    pub fn with_store(prefix: impl Into<String>, store: S, options: IndexedOptions) -> Self {
        let prefix = prefix.into().to_ascii_lowercase();
        Self {
            lifecycle: Lifecycle::new(prefix.clone()),
            prefix,
            store,
            options,
            table: RwLock::new(FileTable::new()),
            sync: Mutex::new(SyncState::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            tree: tokio::sync::RwLock::new(()),
            locks: PathLocks::new(),
        }
    }

    /// Replace the options. Only meaningful before mounting.
    pub fn with_options(mut self, options: IndexedOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &IndexedOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot of the current file table.
    pub fn table_snapshot(&self) -> FileTable {
        self.table.read().clone()
    }

    /// True if the table has changes not yet written to the store.
    pub fn is_dirty(&self) -> bool {
        self.sync.lock().dirty
    }

    /// Run `f` with sync paused, then resume with one consolidated flush.
    ///
    /// The resume runs whether `f` succeeds or fails. If the returned future
    /// is dropped before completion, the pause is lifted on drop and the
    /// changes stay dirty until the next flush (the next mutation, another
    /// resume, or `uninit`).
    pub async fn batch<T, F, Fut>(&self, f: F) -> FsResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FsResult<T>>,
    {
        FileSystemDriver::pause_sync(self)?;
        let mut pause = PauseGuard {
            sync: &self.sync,
            armed: true,
        };
        let result = f().await;
        pause.armed = false;
        let resumed = FileSystemDriver::resume_sync(self).await;

        match (result, resumed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), resumed) => {
                if let Err(flush_err) = resumed {
                    warn!(prefix = %self.prefix, "flush after failed batch also failed: {flush_err}");
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Entry guards
    // ========================================================================

    async fn file_op(&self, paths: &[&str]) -> FsResult<FileOp<'_>> {
        let op = self.lifecycle.enter().await?;
        let tree = self.tree.read().await;
        let paths = self.locks.lock_many(paths).await;
        Ok(FileOp {
            _paths: paths,
            _tree: tree,
            _op: op,
        })
    }

    async fn tree_op(&self) -> FsResult<TreeOp<'_>> {
        let op = self.lifecycle.enter().await?;
        let tree = self.tree.write().await;
        Ok(TreeOp {
            _tree: tree,
            _op: op,
        })
    }

    fn check_writable(&self, path: &str) -> FsResult<()> {
        if self.options.read_only {
            Err(FsError::read_only(path::join_full(&self.prefix, path)))
        } else {
            Ok(())
        }
    }

    fn full(&self, path: &str) -> String {
        path::join_full(&self.prefix, path)
    }

    fn entry(&self, path: &str) -> Option<FileTableEntry> {
        self.table.read().get(path).cloned()
    }

    // ========================================================================
    // Table helpers
    // ========================================================================

    /// Fail if any ancestor of `path` is a file.
    fn check_parents(&self, table: &FileTable, path: &str) -> FsResult<()> {
        let mut current = parent_path(path);
        loop {
            if let Some(entry) = table.get(&current) {
                if !entry.is_dir() {
                    return Err(FsError::already_exists(self.full(&current)));
                }
            }
            if current == "/" {
                return Ok(());
            }
            current = parent_path(&current);
        }
    }

    /// Create missing ancestors of `path`, shallowest first.
    fn ensure_parents(&self, table: &mut FileTable, path: &str) -> FsResult<()> {
        self.check_parents(table, path)?;
        let mut missing = Vec::new();
        let mut current = parent_path(path);
        while current != "/" && !table.contains_key(&current) {
            missing.push(current.clone());
            current = parent_path(&current);
        }
        for dir in missing.into_iter().rev() {
            table.insert(dir, FileTableEntry::directory());
        }
        Ok(())
    }

    /// Bump the parent's modification time after a child changed.
    fn touch_parent(table: &mut FileTable, path: &str) {
        if let Some(parent) = table.get_mut(&parent_path(path)) {
            parent.touch_modified();
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Mark the table dirty and flush unless sync is paused.
    async fn persist(&self) -> FsResult<()> {
        {
            let mut sync = self.sync.lock();
            sync.dirty = true;
            if sync.paused {
                return Ok(());
            }
        }
        self.flush().await
    }

    /// Write the whole table to the store.
    ///
    /// Flushes are serialized and each serializes the table at the moment it
    /// runs, so a later flush never writes an older snapshot.
    #[tracing::instrument(skip(self), fields(prefix = %self.prefix), name = "indexed.flush")]
    async fn flush(&self) -> FsResult<()> {
        let _flush = self.flush_lock.lock().await;
        let bytes = {
            let table = self.table.read();
            self.sync.lock().dirty = false;
            serde_json::to_vec(&*table)?
        };
        if let Err(e) = self.store.set_item(TABLE_KEY, &bytes).await {
            self.sync.lock().dirty = true;
            return Err(e);
        }
        debug!(bytes = bytes.len(), "flushed file table");
        Ok(())
    }

    /// Delete content records that no entry references any more.
    async fn discard_records(&self, records: Vec<String>) -> FsResult<()> {
        let mut first_err = None;
        for record_id in records {
            if let Err(e) = self.store.remove_item(&record_key(&record_id)).await {
                warn!(prefix = %self.prefix, record = %record_id, "failed to remove content record: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn load(&self) -> FsResult<()> {
        let (table, needs_flush) = match self.store.get_item(TABLE_KEY).await? {
            Some(bytes) => {
                let mut table: FileTable = serde_json::from_slice(&bytes)?;
                let repaired = self.repair(&mut table);
                (table, repaired)
            }
            None => {
                info!(prefix = %self.prefix, "no file table found, starting fresh");
                (fresh_table(), true)
            }
        };
        *self.table.write() = table;
        if needs_flush {
            self.flush().await?;
        }
        self.sweep_orphans().await
    }

    /// Restore table invariants after loading. Returns true if anything changed.
    fn repair(&self, table: &mut FileTable) -> bool {
        let mut repaired = false;
        if !table.get("/").is_some_and(|root| root.is_dir()) {
            warn!(prefix = %self.prefix, "file table lacks a root directory, recreating");
            table.shift_remove("/");
            table.shift_insert(0, "/".to_string(), FileTableEntry::directory());
            repaired = true;
        }

        let keys: Vec<String> = table.keys().cloned().collect();
        for key in keys {
            let parent_missing = key != "/" && !table.contains_key(&parent_path(&key));
            if parent_missing {
                match self.ensure_parents(table, &key) {
                    Ok(()) => repaired = true,
                    Err(e) => warn!(prefix = %self.prefix, path = %key, "cannot restore parents: {e}"),
                }
            }
        }

        for entry in table.values_mut() {
            let inconsistent = match entry.kind {
                EntryType::File => entry.record_id.is_none(),
                EntryType::Directory | EntryType::Empty => entry.record_id.is_some(),
            };
            if inconsistent {
                repaired = true;
                if entry.kind == EntryType::File {
                    entry.kind = EntryType::Empty;
                    entry.length = 0;
                } else {
                    entry.record_id = None;
                }
            }
        }
        repaired
    }

    async fn sweep_orphans(&self) -> FsResult<()> {
        let referenced: HashSet<String> = self
            .table
            .read()
            .values()
            .filter_map(|e| e.record_id.as_deref().map(record_key))
            .collect();

        let orphans: Vec<String> = self
            .store
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(RECORD_PREFIX) && !referenced.contains(k))
            .collect();

        if !orphans.is_empty() {
            warn!(prefix = %self.prefix, count = orphans.len(), "removing orphaned content records");
            for key in orphans {
                self.store.remove_item(&key).await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // File helpers
    // ========================================================================

    /// Content of a file entry; empty for `Empty` entries.
    async fn read_content(&self, path: &str, entry: &FileTableEntry) -> FsResult<Vec<u8>> {
        match (entry.kind, &entry.record_id) {
            (EntryType::Directory, _) => Err(FsError::is_a_directory(self.full(path))),
            (EntryType::File, Some(record_id)) => self
                .store
                .get_item(&record_key(record_id))
                .await?
                .ok_or_else(|| FsError::io(format!("missing content for {}", self.full(path)))),
            _ => Ok(Vec::new()),
        }
    }

    /// The entry at `path` if it is a file that may be removed.
    fn removable_file(&self, path: &str) -> FsResult<FileTableEntry> {
        match self.entry(path) {
            None => Err(FsError::not_found(self.full(path))),
            Some(e) if e.is_dir() => Err(FsError::is_a_directory(self.full(path))),
            Some(e) if e.read_only => Err(FsError::read_only(self.full(path))),
            Some(e) => Ok(e),
        }
    }

    /// Drop a file entry, flush, then delete its content. The caller holds
    /// the path lock and has checked [`Self::removable_file`].
    async fn remove_file(&self, path: &str) -> FsResult<()> {
        let removed = {
            let mut table = self.table.write();
            let removed = table.shift_remove(path);
            Self::touch_parent(&mut table, path);
            removed
        };
        debug!(prefix = %self.prefix, path = %path, "rm");
        self.persist().await?;
        self.discard_records(removed.and_then(|e| e.record_id).into_iter().collect())
            .await
    }

    // ========================================================================
    // Copy helpers
    // ========================================================================

    /// Duplicate the content of `entry` for a new path. `reuse` is the record
    /// id of a file about to be overwritten at the destination.
    async fn copy_content(
        &self,
        src_path: &str,
        entry: &FileTableEntry,
        reuse: Option<String>,
    ) -> FsResult<FileTableEntry> {
        let mut copy = FileTableEntry::empty_file();
        if let (EntryType::File, Some(record_id)) = (entry.kind, &entry.record_id) {
            let data = self
                .store
                .get_item(&record_key(record_id))
                .await?
                .ok_or_else(|| FsError::io(format!("missing content for {}", self.full(src_path))))?;
            let new_id = reuse.unwrap_or_else(new_record_id);
            self.store.set_item(&record_key(&new_id), &data).await?;
            copy.kind = EntryType::File;
            copy.length = data.len() as u64;
            copy.record_id = Some(new_id);
        }
        Ok(copy)
    }

    async fn copy_tree(&self, src: &str, dest: &str) -> FsResult<(BatchOutcome, Vec<String>)> {
        let mut outcome = BatchOutcome::default();
        let mut released = Vec::new();

        let mut keys: Vec<(String, FileTableEntry)> = self
            .table
            .read()
            .iter()
            .filter(|(k, _)| is_within(k, src))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        keys.sort_by_key(|(k, _)| depth(k));

        for (key, entry) in keys {
            let target = rebase(&key, src, dest);
            let existing = self.entry(&target);

            if entry.is_dir() {
                match existing {
                    Some(e) if !e.is_dir() => {
                        outcome.fail(&key, FsError::already_exists(self.full(&target)));
                    }
                    Some(_) => outcome.ok(&key),
                    None => {
                        let mut table = self.table.write();
                        match self.ensure_parents(&mut table, &target) {
                            Ok(()) => {
                                table.insert(target, FileTableEntry::directory());
                                outcome.ok(&key);
                            }
                            Err(e) => outcome.fail(&key, e),
                        }
                    }
                }
                continue;
            }

            let reuse = match &existing {
                Some(e) if e.is_dir() => {
                    outcome.fail(&key, FsError::is_a_directory(self.full(&target)));
                    continue;
                }
                Some(e) if e.read_only => {
                    outcome.fail(&key, FsError::read_only(self.full(&target)));
                    continue;
                }
                Some(e) => e.record_id.clone(),
                None => None,
            };

            match self.copy_content(&key, &entry, reuse.clone()).await {
                Ok(copy) => {
                    if copy.record_id.is_none() {
                        released.extend(reuse);
                    }
                    let mut table = self.table.write();
                    match self.ensure_parents(&mut table, &target) {
                        Ok(()) => {
                            Self::touch_parent(&mut table, &target);
                            table.insert(target, copy);
                            outcome.ok(&key);
                        }
                        Err(e) => outcome.fail(&key, e),
                    }
                }
                Err(e) => outcome.fail(&key, e),
            }
        }
        Ok((outcome, released))
    }
}

/// Lifts a sync pause if a batch future is dropped before it resumes.
struct PauseGuard<'a> {
    sync: &'a Mutex<SyncState>,
    armed: bool,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut sync = self.sync.lock();
            sync.paused = false;
            sync.dirty = true;
            warn!("sync batch dropped before resume; changes stay dirty until the next flush");
        }
    }
}

#[async_trait]
impl<S: KvStore + 'static> FileSystemDriver for IndexedFileSystem<S> {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Persistent
    }

    fn read_only(&self) -> bool {
        self.options.read_only
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    #[tracing::instrument(skip(self), fields(prefix = %self.prefix), name = "indexed.init")]
    async fn init(&self) -> FsResult<()> {
        if !self.lifecycle.begin_init()? {
            return Ok(());
        }
        let result = self.load().await;
        self.lifecycle.finish_init(result.is_ok());
        match &result {
            Ok(()) => info!(entries = self.table.read().len(), "drive ready"),
            Err(e) => warn!("init failed: {e}"),
        }
        result
    }

    #[tracing::instrument(skip(self), fields(prefix = %self.prefix), name = "indexed.uninit")]
    async fn uninit(&self) -> FsResult<()> {
        let Some(gate) = self.lifecycle.begin_uninit().await else {
            return Ok(());
        };
        let result = if self.is_dirty() {
            self.flush().await
        } else {
            Ok(())
        };
        let closed = self.store.close().await;
        self.table.write().clear();
        drop(gate);
        self.lifecycle.finish_uninit();
        info!("drive closed");
        result.and(closed)
    }

    fn filetype(&self, path: &str) -> FsResult<Filetype> {
        self.lifecycle.check()?;
        let path = normalize(path);
        Ok(Filetype::from(self.table.read().get(&path).map(|e| e.kind)))
    }

    fn stat(&self, path: &str) -> FsResult<Stat> {
        self.lifecycle.check()?;
        let path = normalize(path);
        self.table
            .read()
            .get(&path)
            .map(Stat::from)
            .ok_or_else(|| FsError::not_found(self.full(&path)))
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        self.lifecycle.check()?;
        let path = normalize(path);
        let table = self.table.read();
        match table.get(&path) {
            Some(entry) if entry.is_dir() => {}
            _ => return Err(FsError::not_found(self.full(&path))),
        }

        let mut names: Vec<String> = table
            .keys()
            .filter(|k| k.as_str() != "/" && parent_path(k) == path)
            .map(|k| path::fname(k))
            .collect();
        if self.options.sort_entries {
            names.sort();
        }
        Ok(names)
    }

    fn usage(&self) -> FsResult<Usage> {
        self.lifecycle.check()?;
        let table = self.table.read();
        let mut usage = Usage::default();
        for entry in table.values() {
            if entry.is_dir() {
                usage.directories += 1;
            } else {
                usage.files += 1;
                usage.bytes += entry.length;
            }
        }
        Ok(usage)
    }

    async fn readbin(&self, path: &str) -> FsResult<Vec<u8>> {
        let path = normalize(path);
        let _op = self.file_op(&[path.as_str()]).await?;

        let entry = self
            .entry(&path)
            .ok_or_else(|| FsError::not_found(self.full(&path)))?;
        let data = self.read_content(&path, &entry).await?;

        // Access times ride along with the next flush.
        if let Some(entry) = self.table.write().get_mut(&path) {
            entry.touch_accessed();
        }
        self.sync.lock().dirty = true;
        Ok(data)
    }

    async fn writebin(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let path = normalize(path);
        let _op = self.file_op(&[path.as_str()]).await?;
        self.check_writable(&path)?;

        if path == "/" {
            return Err(FsError::is_a_directory(self.full(&path)));
        }
        let existing = self.entry(&path);
        match &existing {
            Some(e) if e.is_dir() => return Err(FsError::is_a_directory(self.full(&path))),
            Some(e) if e.read_only => return Err(FsError::read_only(self.full(&path))),
            _ => {}
        }
        self.check_parents(&self.table.read(), &path)?;

        let old_record = existing.as_ref().and_then(|e| e.record_id.clone());
        let new_record = if data.is_empty() {
            None
        } else {
            let record_id = old_record.clone().unwrap_or_else(new_record_id);
            self.store.set_item(&record_key(&record_id), data).await?;
            Some(record_id)
        };

        {
            let mut table = self.table.write();
            self.ensure_parents(&mut table, &path)?;
            let mut entry = existing.unwrap_or_else(FileTableEntry::empty_file);
            entry.kind = if data.is_empty() {
                EntryType::Empty
            } else {
                EntryType::File
            };
            entry.length = data.len() as u64;
            entry.record_id = new_record.clone();
            entry.touch_modified();
            Self::touch_parent(&mut table, &path);
            table.insert(path.clone(), entry);
        }
        debug!(prefix = %self.prefix, path = %path, len = data.len(), "write");
        self.persist().await?;

        match old_record {
            Some(old) if new_record.is_none() => self.discard_records(vec![old]).await,
            _ => Ok(()),
        }
    }

    async fn mkdir(&self, path: &str) -> FsResult<()> {
        let path = normalize(path);
        let _op = self.file_op(&[path.as_str()]).await?;
        self.check_writable(&path)?;

        {
            let mut table = self.table.write();
            match table.get(&path) {
                Some(e) if e.is_dir() => return Ok(()),
                Some(_) => return Err(FsError::already_exists(self.full(&path))),
                None => {}
            }
            self.ensure_parents(&mut table, &path)?;
            Self::touch_parent(&mut table, &path);
            table.insert(path.clone(), FileTableEntry::directory());
        }
        self.persist().await
    }

    async fn touch(&self, path: &str) -> FsResult<()> {
        let path = normalize(path);
        let _op = self.file_op(&[path.as_str()]).await?;
        self.check_writable(&path)?;

        {
            let mut table = self.table.write();
            match table.get_mut(&path) {
                Some(e) if e.is_dir() => return Ok(()),
                Some(e) if e.read_only => return Err(FsError::read_only(self.full(&path))),
                Some(e) => e.touch_modified(),
                None => {
                    self.ensure_parents(&mut table, &path)?;
                    Self::touch_parent(&mut table, &path);
                    table.insert(path.clone(), FileTableEntry::empty_file());
                }
            }
        }
        self.persist().await
    }

    async fn rm(&self, path: &str) -> FsResult<()> {
        let path = normalize(path);
        let _op = self.file_op(&[path.as_str()]).await?;
        self.check_writable(&path)?;
        self.removable_file(&path)?;
        self.remove_file(&path).await
    }

    async fn rmdir(&self, path: &str) -> FsResult<()> {
        let path = normalize(path);
        let _op = self.tree_op().await?;
        self.check_writable(&path)?;

        if path == "/" {
            return Err(FsError::invalid_path(format!("cannot remove root of {}:", self.prefix)));
        }
        let records = {
            let mut table = self.table.write();
            match table.get(&path) {
                Some(e) if e.is_dir() => {}
                _ => return Err(FsError::not_found(self.full(&path))),
            }
            let doomed: Vec<String> = table
                .keys()
                .filter(|k| is_within(k, &path))
                .cloned()
                .collect();
            let locked = doomed
                .iter()
                .find(|k| table.get(k.as_str()).is_some_and(|e| e.read_only));
            if let Some(locked) = locked {
                return Err(FsError::read_only(self.full(locked)));
            }

            let mut records = Vec::new();
            for key in &doomed {
                if let Some(entry) = table.shift_remove(key) {
                    records.extend(entry.record_id);
                }
            }
            Self::touch_parent(&mut table, &path);
            debug!(prefix = %self.prefix, path = %path, entries = doomed.len(), "rmdir");
            records
        };
        self.persist().await?;
        self.discard_records(records).await
    }

    async fn cpfile(&self, src: &str, dest: &str) -> FsResult<()> {
        let src = normalize(src);
        let dest = normalize(dest);
        let _op = self.file_op(&[src.as_str(), dest.as_str()]).await?;
        self.check_writable(&dest)?;

        let entry = self
            .entry(&src)
            .ok_or_else(|| FsError::not_found(self.full(&src)))?;
        if entry.is_dir() {
            return Err(FsError::is_a_directory(self.full(&src)));
        }
        if src == dest {
            return Ok(());
        }
        let existing = self.entry(&dest);
        let reuse = match &existing {
            Some(e) if e.is_dir() => return Err(FsError::is_a_directory(self.full(&dest))),
            Some(e) if e.read_only => return Err(FsError::read_only(self.full(&dest))),
            Some(e) => e.record_id.clone(),
            None => None,
        };
        self.check_parents(&self.table.read(), &dest)?;

        let copy = self.copy_content(&src, &entry, reuse.clone()).await?;
        let released = if copy.record_id.is_none() { reuse } else { None };
        {
            let mut table = self.table.write();
            self.ensure_parents(&mut table, &dest)?;
            Self::touch_parent(&mut table, &dest);
            table.insert(dest, copy);
        }
        self.persist().await?;
        self.discard_records(released.into_iter().collect()).await
    }

    async fn cpdir(&self, src: &str, dest: &str) -> FsResult<BatchOutcome> {
        let src = normalize(src);
        let dest = normalize(dest);
        let _op = self.tree_op().await?;
        self.check_writable(&dest)?;

        match self.entry(&src) {
            Some(e) if e.is_dir() => {}
            _ => return Err(FsError::not_found(self.full(&src))),
        }
        if is_within(&dest, &src) {
            return Err(FsError::invalid_path(format!(
                "cannot copy {} into itself",
                self.full(&src)
            )));
        }

        let (outcome, released) = self.copy_tree(&src, &dest).await?;
        debug!(
            prefix = %self.prefix,
            src = %src,
            dest = %dest,
            copied = outcome.done.len(),
            failed = outcome.failed.len(),
            "cpdir"
        );
        self.persist().await?;
        self.discard_records(released).await?;
        Ok(outcome)
    }

    async fn mvfile(&self, src: &str, dest: &str) -> FsResult<()> {
        let src = normalize(src);
        let dest = normalize(dest);
        let _op = self.file_op(&[src.as_str(), dest.as_str()]).await?;
        self.check_writable(&src)?;

        let released = {
            let mut table = self.table.write();
            match table.get(&src) {
                None => return Err(FsError::not_found(self.full(&src))),
                Some(e) if e.is_dir() => return Err(FsError::is_a_directory(self.full(&src))),
                Some(e) if e.read_only => return Err(FsError::read_only(self.full(&src))),
                Some(_) => {}
            }
            if src == dest {
                return Ok(());
            }
            let released = match table.get(&dest) {
                Some(e) if e.is_dir() => return Err(FsError::is_a_directory(self.full(&dest))),
                Some(e) if e.read_only => return Err(FsError::read_only(self.full(&dest))),
                Some(e) => e.record_id.clone(),
                None => None,
            };
            self.ensure_parents(&mut table, &dest)?;

            // Content stays under its record id; only the key moves.
            let Some(entry) = table.shift_remove(&src) else {
                return Err(FsError::not_found(self.full(&src)));
            };
            Self::touch_parent(&mut table, &src);
            Self::touch_parent(&mut table, &dest);
            table.insert(dest.clone(), entry);
            released
        };
        debug!(prefix = %self.prefix, src = %src, dest = %dest, "mvfile");
        self.persist().await?;
        self.discard_records(released.into_iter().collect()).await
    }

    async fn mvdir(&self, src: &str, dest: &str) -> FsResult<BatchOutcome> {
        let src = normalize(src);
        let dest = normalize(dest);
        let _op = self.tree_op().await?;
        self.check_writable(&src)?;

        let outcome = {
            let mut table = self.table.write();
            if src == "/" {
                return Err(FsError::invalid_path(format!("cannot move root of {}:", self.prefix)));
            }
            match table.get(&src) {
                Some(e) if e.is_dir() => {}
                _ => return Err(FsError::not_found(self.full(&src))),
            }
            if table.contains_key(&dest) {
                return Err(FsError::already_exists(self.full(&dest)));
            }
            if is_within(&dest, &src) {
                return Err(FsError::invalid_path(format!(
                    "cannot move {} into itself",
                    self.full(&src)
                )));
            }
            self.ensure_parents(&mut table, &dest)?;

            let mut keys: Vec<String> = table
                .keys()
                .filter(|k| is_within(k, &src))
                .cloned()
                .collect();
            keys.sort_by_key(|k| depth(k));
            let pinned: Vec<String> = keys
                .iter()
                .filter(|k| table.get(k.as_str()).is_some_and(|e| e.read_only))
                .cloned()
                .collect();

            let mut outcome = BatchOutcome::default();
            for key in &keys {
                if let Some(pin) = pinned.iter().find(|p| is_within(key, p)) {
                    if pin == key {
                        outcome.fail(key, FsError::read_only(self.full(key)));
                    }
                    continue;
                }
                let target = rebase(key, &src, &dest);
                let keeps_children = pinned.iter().any(|p| is_within(p, key));
                let entry = if keeps_children {
                    FileTableEntry::directory()
                } else {
                    match table.shift_remove(key) {
                        Some(entry) => entry,
                        None => continue,
                    }
                };
                table.insert(target, entry);
                outcome.ok(key);
            }
            Self::touch_parent(&mut table, &src);
            Self::touch_parent(&mut table, &dest);
            outcome
        };
        debug!(
            prefix = %self.prefix,
            src = %src,
            dest = %dest,
            moved = outcome.done.len(),
            failed = outcome.failed.len(),
            "mvdir"
        );
        self.persist().await?;
        Ok(outcome)
    }

    async fn transfer_file(
        &self,
        path: &str,
        dest: &dyn FileSystemDriver,
        dest_path: &str,
    ) -> FsResult<()> {
        let path = normalize(path);
        let _op = self.file_op(&[path.as_str()]).await?;
        self.check_writable(&path)?;
        let entry = self.removable_file(&path)?;

        let data = self.read_content(&path, &entry).await?;
        dest.writebin(dest_path, &data).await?;
        debug!(prefix = %self.prefix, path = %path, dest = %dest.prefix(), "transfer");
        self.remove_file(&path).await
    }

    async fn set_read_only(&self, path: &str, read_only: bool) -> FsResult<()> {
        let path = normalize(path);
        let _op = self.file_op(&[path.as_str()]).await?;
        self.check_writable(&path)?;
        {
            let mut table = self.table.write();
            let entry = table
                .get_mut(&path)
                .ok_or_else(|| FsError::not_found(self.full(&path)))?;
            entry.read_only = read_only;
        }
        self.persist().await
    }

    fn pause_sync(&self) -> FsResult<()> {
        self.lifecycle.check()?;
        let mut sync = self.sync.lock();
        if sync.paused {
            return Err(FsError::Busy(format!("sync already paused on {}:", self.prefix)));
        }
        sync.paused = true;
        debug!(prefix = %self.prefix, "sync paused");
        Ok(())
    }

    async fn resume_sync(&self) -> FsResult<()> {
        {
            let mut sync = self.sync.lock();
            if !sync.paused {
                return Err(FsError::Busy(format!("sync not paused on {}:", self.prefix)));
            }
            sync.paused = false;
        }
        if self.lifecycle.state() == DriverState::Closed {
            return Err(FsError::closed(&self.prefix));
        }
        debug!(prefix = %self.prefix, "sync resumed");
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backends::memory::{MemoryStore, RamFileSystem};
    use crate::vfs::types::now_millis;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store wrapper counting table snapshots and optionally failing writes.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        table_writes: AtomicUsize,
        fail_records: std::sync::atomic::AtomicBool,
    }

    impl CountingStore {
        fn snapshots(&self) -> usize {
            self.table_writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KvStore for CountingStore {
        async fn get_item(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
            self.inner.get_item(key).await
        }

        async fn set_item(&self, key: &str, value: &[u8]) -> FsResult<()> {
            if key == TABLE_KEY {
                self.table_writes.fetch_add(1, Ordering::SeqCst);
            } else if self.fail_records.load(Ordering::SeqCst) {
                return Err(FsError::io("disk full"));
            }
            self.inner.set_item(key, value).await
        }

        async fn remove_item(&self, key: &str) -> FsResult<()> {
            self.inner.remove_item(key).await
        }

        async fn keys(&self) -> FsResult<Vec<String>> {
            self.inner.keys().await
        }
    }

    async fn counted() -> (IndexedFileSystem<Arc<CountingStore>>, Arc<CountingStore>) {
        let store = Arc::new(CountingStore::default());
        let fs = IndexedFileSystem::with_store("c", Arc::clone(&store), IndexedOptions::default());
        fs.init().await.unwrap();
        (fs, store)
    }

    async fn ram() -> RamFileSystem {
        let fs = RamFileSystem::new("c");
        fs.init().await.unwrap();
        fs
    }

    async fn record_keys<S: KvStore>(store: &S) -> Vec<String> {
        let mut keys: Vec<String> = store
            .keys()
            .await
            .unwrap()
            .into_iter()
            .filter(|k| k.starts_with(RECORD_PREFIX))
            .collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_fresh_table_has_root() {
        let (fs, store) = counted().await;
        assert_eq!(fs.filetype("/").unwrap(), Filetype::Directory);
        assert!(fs.readdir("/").unwrap().is_empty());
        assert_eq!(store.snapshots(), 1, "fresh table is persisted once");
    }

    #[tokio::test]
    async fn test_not_ready_before_init() {
        let fs = RamFileSystem::new("c");
        assert!(matches!(fs.filetype("/"), Err(FsError::NotReady(_))));
        assert!(matches!(fs.readbin("/x").await, Err(FsError::NotReady(_))));
        assert!(matches!(fs.mkdir("/x").await, Err(FsError::NotReady(_))));
    }

    #[tokio::test]
    async fn test_closed_after_uninit() {
        let fs = ram().await;
        fs.uninit().await.unwrap();
        assert_eq!(fs.state(), DriverState::Closed);
        assert!(matches!(fs.stat("/"), Err(FsError::Closed(_))));
        assert!(matches!(fs.writestr("/a", "x").await, Err(FsError::Closed(_))));
    }

    #[tokio::test]
    async fn test_write_read_stat() {
        let fs = ram().await;
        fs.writebin("/a.bin", &[1, 2, 3]).await.unwrap();
        assert_eq!(fs.readbin("/a.bin").await.unwrap(), vec![1, 2, 3]);

        let stat = fs.stat("/a.bin").unwrap();
        assert_eq!(stat.length, 3);
        assert_eq!(stat.kind, EntryType::File);
        assert!(stat.record_id.is_some());
        assert!(!stat.read_only);
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let fs = ram().await;
        fs.writestr("/a/b/c.txt", "deep").await.unwrap();
        assert_eq!(fs.filetype("/a").unwrap(), Filetype::Directory);
        assert_eq!(fs.filetype("/a/b").unwrap(), Filetype::Directory);
        assert_eq!(fs.readdir("/a/b").unwrap(), vec!["c.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_write_under_file_fails() {
        let fs = ram().await;
        fs.writestr("/f", "x").await.unwrap();
        assert!(matches!(
            fs.writestr("/f/child", "y").await,
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(fs.mkdir("/f").await, Err(FsError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_empty_file_has_no_record() {
        let (fs, store) = counted().await;
        fs.writestr("/e.txt", "").await.unwrap();
        let stat = fs.stat("/e.txt").unwrap();
        assert_eq!(stat.kind, EntryType::Empty);
        assert!(stat.record_id.is_none());
        assert!(record_keys(&store).await.is_empty());
        assert_eq!(fs.readstr("/e.txt").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_truncate_to_empty_releases_record() {
        let (fs, store) = counted().await;
        fs.writestr("/t.txt", "content").await.unwrap();
        assert_eq!(record_keys(&store).await.len(), 1);

        fs.writestr("/t.txt", "").await.unwrap();
        assert!(record_keys(&store).await.is_empty());
        assert!(fs.stat("/t.txt").unwrap().record_id.is_none());
    }

    #[tokio::test]
    async fn test_rewrite_keeps_record_id() {
        let (fs, store) = counted().await;
        fs.writestr("/same.txt", "v").await.unwrap();
        let first = fs.stat("/same.txt").unwrap().record_id;
        fs.writestr("/same.txt", "v").await.unwrap();
        let second = fs.stat("/same.txt").unwrap().record_id;
        assert_eq!(first, second);
        assert_eq!(record_keys(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_content_write_leaves_table_alone() {
        let (fs, store) = counted().await;
        store.fail_records.store(true, Ordering::SeqCst);
        let result = fs.writestr("/x.txt", "data").await;
        assert!(matches!(result, Err(FsError::Io(_))));
        assert_eq!(fs.filetype("/x.txt").unwrap(), Filetype::Missing);
    }

    #[tokio::test]
    async fn test_read_errors() {
        let fs = ram().await;
        fs.mkdir("/dir").await.unwrap();
        assert!(matches!(fs.readbin("/dir").await, Err(FsError::IsADirectory(_))));
        assert!(matches!(fs.readbin("/nope").await, Err(FsError::NotFound(_))));
        assert!(matches!(fs.readdir("/nope"), Err(FsError::NotFound(_))));
        fs.touch("/file").await.unwrap();
        assert!(matches!(fs.readdir("/file"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.writestr("/dir", "x").await, Err(FsError::IsADirectory(_))));
    }

    #[tokio::test]
    async fn test_rm_removes_record() {
        let (fs, store) = counted().await;
        fs.writestr("/gone.txt", "bye").await.unwrap();
        fs.rm("/gone.txt").await.unwrap();
        assert_eq!(fs.filetype("/gone.txt").unwrap(), Filetype::Missing);
        assert!(record_keys(&store).await.is_empty());
        assert!(matches!(fs.rm("/gone.txt").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rmdir_recursive() {
        let (fs, store) = counted().await;
        fs.writestr("/d/a.txt", "a").await.unwrap();
        fs.writestr("/d/sub/b.txt", "b").await.unwrap();
        fs.writestr("/keep.txt", "k").await.unwrap();

        assert!(matches!(fs.rm("/d").await, Err(FsError::IsADirectory(_))));
        fs.rmdir("/d").await.unwrap();

        assert_eq!(fs.readdir("/").unwrap(), vec!["keep.txt".to_string()]);
        assert_eq!(record_keys(&store).await.len(), 1);
        assert!(matches!(fs.rmdir("/").await, Err(FsError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_read_only_entry() {
        let fs = ram().await;
        fs.writestr("/locked.txt", "v1").await.unwrap();
        fs.set_read_only("/locked.txt", true).await.unwrap();

        assert!(matches!(fs.writestr("/locked.txt", "v2").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.rm("/locked.txt").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.mvfile("/locked.txt", "/other.txt").await, Err(FsError::ReadOnly(_))));
        assert_eq!(fs.readstr("/locked.txt").await.unwrap(), "v1");
        assert!(fs.stat("/locked.txt").unwrap().read_only);

        fs.set_read_only("/locked.txt", false).await.unwrap();
        fs.writestr("/locked.txt", "v2").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_only_driver() {
        let fs = RamFileSystem::new("c").with_options(IndexedOptions {
            read_only: true,
            ..Default::default()
        });
        fs.init().await.unwrap();
        assert!(fs.read_only());
        assert!(matches!(fs.writestr("/a", "x").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.mkdir("/d").await, Err(FsError::ReadOnly(_))));
    }

    #[tokio::test]
    async fn test_mvfile_keeps_record() {
        let (fs, store) = counted().await;
        fs.writestr("/a.txt", "moving").await.unwrap();
        let record = fs.stat("/a.txt").unwrap().record_id;

        fs.mvfile("/a.txt", "/dir/b.txt").await.unwrap();
        assert_eq!(fs.filetype("/a.txt").unwrap(), Filetype::Missing);
        assert_eq!(fs.stat("/dir/b.txt").unwrap().record_id, record);
        assert_eq!(fs.readstr("/dir/b.txt").await.unwrap(), "moving");
        assert_eq!(record_keys(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn test_mvfile_over_existing_releases_old_record() {
        let (fs, store) = counted().await;
        fs.writestr("/a.txt", "new").await.unwrap();
        fs.writestr("/b.txt", "old").await.unwrap();
        fs.mvfile("/a.txt", "/b.txt").await.unwrap();
        assert_eq!(fs.readstr("/b.txt").await.unwrap(), "new");
        assert_eq!(record_keys(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn test_cpfile_duplicates_content() {
        let (fs, store) = counted().await;
        fs.writestr("/a.txt", "copy me").await.unwrap();
        fs.cpfile("/a.txt", "/b.txt").await.unwrap();

        let a = fs.stat("/a.txt").unwrap().record_id;
        let b = fs.stat("/b.txt").unwrap().record_id;
        assert_ne!(a, b);
        assert_eq!(fs.readstr("/b.txt").await.unwrap(), "copy me");
        assert_eq!(record_keys(&store).await.len(), 2);

        fs.writestr("/a.txt", "changed").await.unwrap();
        assert_eq!(fs.readstr("/b.txt").await.unwrap(), "copy me");
    }

    #[tokio::test]
    async fn test_cpdir_and_mvdir() {
        let fs = ram().await;
        fs.writestr("/src/a.txt", "a").await.unwrap();
        fs.writestr("/src/sub/b.txt", "b").await.unwrap();
        fs.touch("/src/empty").await.unwrap();

        let outcome = fs.cpdir("/src", "/copy").await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(fs.readstr("/copy/sub/b.txt").await.unwrap(), "b");
        assert_eq!(fs.stat("/copy/empty").unwrap().kind, EntryType::Empty);

        let outcome = fs.mvdir("/copy", "/moved").await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(fs.filetype("/copy").unwrap(), Filetype::Missing);
        assert_eq!(fs.readstr("/moved/a.txt").await.unwrap(), "a");
        assert_eq!(fs.readdir("/moved").unwrap(), vec!["a.txt", "empty", "sub"]);
    }

    #[tokio::test]
    async fn test_cpdir_into_itself_fails() {
        let fs = ram().await;
        fs.mkdir("/src").await.unwrap();
        assert!(matches!(fs.cpdir("/src", "/src/inner").await, Err(FsError::InvalidPath(_))));
        assert!(matches!(fs.mvdir("/src", "/src/inner").await, Err(FsError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_mvdir_leaves_read_only_entries() {
        let fs = ram().await;
        fs.writestr("/src/free.txt", "f").await.unwrap();
        fs.writestr("/src/pinned.txt", "p").await.unwrap();
        fs.set_read_only("/src/pinned.txt", true).await.unwrap();

        let outcome = fs.mvdir("/src", "/dest").await.unwrap();
        assert!(!outcome.is_complete());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "/src/pinned.txt");

        assert_eq!(fs.readstr("/dest/free.txt").await.unwrap(), "f");
        assert_eq!(fs.readstr("/src/pinned.txt").await.unwrap(), "p");
        assert_eq!(fs.readdir("/src").unwrap(), vec!["pinned.txt"]);
    }

    #[tokio::test]
    async fn test_mvdir_existing_dest() {
        let fs = ram().await;
        fs.mkdir("/a").await.unwrap();
        fs.mkdir("/b").await.unwrap();
        assert!(matches!(fs.mvdir("/a", "/b").await, Err(FsError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_rename() {
        let fs = ram().await;
        fs.writestr("/dir/old.txt", "x").await.unwrap();
        fs.rename("/dir/old.txt", "new.txt").await.unwrap();
        assert_eq!(fs.readdir("/dir").unwrap(), vec!["new.txt"]);

        fs.rename("/dir", "folder").await.unwrap();
        assert_eq!(fs.readstr("/folder/new.txt").await.unwrap(), "x");
        assert!(matches!(fs.rename("/folder", "a/b").await, Err(FsError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_readdir_ordering_policy() {
        let fs = RamFileSystem::new("c").with_options(IndexedOptions {
            sort_entries: false,
            ..Default::default()
        });
        fs.init().await.unwrap();
        for name in ["zeta", "alpha", "mid"] {
            fs.touch(&format!("/{name}")).await.unwrap();
        }
        assert_eq!(fs.readdir("/").unwrap(), vec!["zeta", "alpha", "mid"]);

        let sorted = ram().await;
        for name in ["zeta", "alpha", "mid"] {
            sorted.touch(&format!("/{name}")).await.unwrap();
        }
        assert_eq!(sorted.readdir("/").unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_each_mutation_flushes() {
        let (fs, store) = counted().await;
        let base = store.snapshots();
        fs.mkdir("/d").await.unwrap();
        fs.writestr("/d/a", "1").await.unwrap();
        fs.rm("/d/a").await.unwrap();
        assert_eq!(store.snapshots(), base + 3);
    }

    #[tokio::test]
    async fn test_pause_resume_single_snapshot() {
        let (fs, store) = counted().await;
        let base = store.snapshots();

        fs.pause_sync().unwrap();
        for i in 0..5 {
            fs.writestr(&format!("/f{i}.txt"), "data").await.unwrap();
        }
        fs.rm("/f0.txt").await.unwrap();
        assert_eq!(store.snapshots(), base, "nothing persisted while paused");
        fs.resume_sync().await.unwrap();
        assert_eq!(store.snapshots(), base + 1);

        let persisted: FileTable =
            serde_json::from_slice(&store.get_item(TABLE_KEY).await.unwrap().unwrap()).unwrap();
        assert!(!persisted.contains_key("/f0.txt"));
        assert!(persisted.contains_key("/f4.txt"));
    }

    #[tokio::test]
    async fn test_pause_is_not_reentrant() {
        let (fs, _store) = counted().await;
        fs.pause_sync().unwrap();
        assert!(matches!(fs.pause_sync(), Err(FsError::Busy(_))));
        fs.resume_sync().await.unwrap();
        assert!(matches!(fs.resume_sync().await, Err(FsError::Busy(_))));
    }

    #[tokio::test]
    async fn test_batch_resumes_on_error() {
        let (fs, store) = counted().await;
        let base = store.snapshots();

        let result: FsResult<()> = fs
            .batch(|| async {
                fs.writestr("/ok.txt", "fine").await?;
                fs.readbin("/missing").await?;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(FsError::NotFound(_))));
        assert_eq!(store.snapshots(), base + 1, "resume flushed once despite the error");
        assert!(!fs.is_dirty());

        fs.pause_sync().unwrap();
        fs.resume_sync().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_batch_unpauses() {
        let (fs, _store) = counted().await;
        {
            let fut = fs.batch(|| async {
                fs.writestr("/x", "1").await?;
                std::future::pending::<()>().await;
                Ok(())
            });
            let _ = tokio::time::timeout(std::time::Duration::from_millis(10), fut).await;
        }
        assert!(fs.is_dirty());
        fs.pause_sync().unwrap();
        fs.resume_sync().await.unwrap();
        assert!(!fs.is_dirty());
    }

    #[tokio::test]
    async fn test_reload_and_orphan_sweep() {
        let store = Arc::new(MemoryStore::new());
        let fs = IndexedFileSystem::with_store("c", Arc::clone(&store), IndexedOptions::default());
        fs.init().await.unwrap();
        fs.writestr("/keep.txt", "kept").await.unwrap();
        fs.uninit().await.unwrap();

        store.set_item("record:stray", b"orphan").await.unwrap();

        let again = IndexedFileSystem::with_store("c", Arc::clone(&store), IndexedOptions::default());
        again.init().await.unwrap();
        assert_eq!(again.readstr("/keep.txt").await.unwrap(), "kept");
        assert!(store.get_item("record:stray").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repair_missing_root_and_parents() {
        let store = Arc::new(MemoryStore::new());
        let mut table = FileTable::new();
        table.insert("/a/b.txt".to_string(), FileTableEntry::empty_file());
        store
            .set_item(TABLE_KEY, &serde_json::to_vec(&table).unwrap())
            .await
            .unwrap();

        let fs = IndexedFileSystem::with_store("c", Arc::clone(&store), IndexedOptions::default());
        fs.init().await.unwrap();
        assert_eq!(fs.filetype("/").unwrap(), Filetype::Directory);
        assert_eq!(fs.filetype("/a").unwrap(), Filetype::Directory);
        assert_eq!(fs.readdir("/a").unwrap(), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_corrupt_table_fails_init() {
        let store = Arc::new(MemoryStore::new());
        store.set_item(TABLE_KEY, b"{not json").await.unwrap();
        let fs = IndexedFileSystem::with_store("c", store, IndexedOptions::default());
        assert!(matches!(fs.init().await, Err(FsError::Io(_))));
        assert_eq!(fs.state(), DriverState::Unmounted);
    }

    #[tokio::test]
    async fn test_read_bumps_access_time_without_flush() {
        let (fs, store) = counted().await;
        fs.writestr("/a.txt", "x").await.unwrap();
        let base = store.snapshots();
        {
            let mut table = fs.table.write();
            table.get_mut("/a.txt").unwrap().date_accessed = 0;
        }
        fs.readbin("/a.txt").await.unwrap();
        assert!(fs.stat("/a.txt").unwrap().date_accessed > 0);
        assert_eq!(store.snapshots(), base);
        assert!(fs.is_dirty());

        fs.uninit().await.unwrap();
        assert_eq!(store.snapshots(), base + 1, "uninit flushes dirty table");
    }

    #[tokio::test]
    async fn test_touch_bumps_modified() {
        let fs = ram().await;
        fs.touch("/t").await.unwrap();
        {
            let mut table = fs.table.write();
            table.get_mut("/t").unwrap().date_modified = 1;
        }
        fs.touch("/t").await.unwrap();
        assert!(fs.stat("/t").unwrap().date_modified > 1);

        {
            let mut table = fs.table.write();
            table.get_mut("/t").unwrap().date_modified = now_millis() + 60_000;
        }
        fs.touch("/t").await.unwrap();
        assert!(fs.stat("/t").unwrap().date_modified > now_millis());
    }

    #[tokio::test]
    async fn test_concurrent_write_and_rm_leave_no_dangling_record() {
        let store = Arc::new(CountingStore::default());
        let fs = Arc::new(IndexedFileSystem::with_store(
            "c",
            Arc::clone(&store),
            IndexedOptions::default(),
        ));
        fs.init().await.unwrap();
        fs.writestr("/race.txt", "seed").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let fs = Arc::clone(&fs);
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    let _ = fs.writestr("/race.txt", &format!("v{i}")).await;
                } else {
                    let _ = fs.rm("/race.txt").await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let records = record_keys(&store).await;
        match fs.stat("/race.txt") {
            Ok(stat) => {
                let id = stat.record_id.unwrap();
                assert_eq!(records, vec![record_key(&id)]);
            }
            Err(FsError::NotFound(_)) => assert!(records.is_empty()),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn test_usage() {
        let fs = ram().await;
        fs.writestr("/a/x.txt", "12345").await.unwrap();
        fs.touch("/a/e").await.unwrap();
        let usage = fs.usage().unwrap();
        assert_eq!(usage.files, 2);
        assert_eq!(usage.directories, 2);
        assert_eq!(usage.bytes, 5);
    }

    #[tokio::test]
    async fn test_transfer_file() {
        let src = ram().await;
        let dest = RamFileSystem::new("d");
        dest.init().await.unwrap();
        src.writestr("/a/moved.txt", "payload").await.unwrap();

        src.transfer_file("/a/moved.txt", &dest, "/in/moved.txt").await.unwrap();
        assert!(!src.exists("/a/moved.txt").unwrap());
        assert!(record_keys(src.store()).await.is_empty());
        assert_eq!(dest.readstr("/in/moved.txt").await.unwrap(), "payload");

        src.writestr("/pinned.txt", "stay").await.unwrap();
        src.set_read_only("/pinned.txt", true).await.unwrap();
        assert!(matches!(
            src.transfer_file("/pinned.txt", &dest, "/pinned.txt").await,
            Err(FsError::ReadOnly(_))
        ));
        assert!(matches!(
            src.transfer_file("/a", &dest, "/a").await,
            Err(FsError::IsADirectory(_))
        ));
        assert!(!dest.exists("/pinned.txt").unwrap());
        assert_eq!(src.readstr("/pinned.txt").await.unwrap(), "stay");
    }

    #[tokio::test]
    async fn test_failed_transfer_keeps_source() {
        let src = ram().await;
        let dest = RamFileSystem::new("d");
        dest.init().await.unwrap();
        dest.mkdir("/taken").await.unwrap();
        src.writestr("/f.txt", "kept").await.unwrap();

        assert!(matches!(
            src.transfer_file("/f.txt", &dest, "/taken").await,
            Err(FsError::IsADirectory(_))
        ));
        assert_eq!(src.readstr("/f.txt").await.unwrap(), "kept");
    }
}
