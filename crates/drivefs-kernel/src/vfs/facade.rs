//! Public entry point over the mount table.
//!
//! Every call splits a full path (`c:/docs/a.txt`) into prefix and in-drive
//! path, looks up the driver, and delegates. Copies and moves between two
//! different drives are carried out here, since no single driver can.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{BatchOutcome, FsError, FsResult};
use super::mount::MountTable;
use super::ops::FileSystemDriver;
use super::path::{self, FullPath, child_path, deconstruct_full_path, rebase};
use super::types::{Blob, Filetype, MountInfo, Stat, Usage};

/// Drive-letter virtual file system.
#[derive(Debug, Clone, Default)]
pub struct Vfs {
    mounts: Arc<MountTable>,
}

type Resolved = (Arc<dyn FileSystemDriver>, FullPath);

/// Re-qualify in-drive outcome paths with their prefix.
fn qualify(prefix: &str, outcome: BatchOutcome) -> BatchOutcome {
    BatchOutcome {
        done: outcome
            .done
            .into_iter()
            .map(|p| path::join_full(prefix, &p))
            .collect(),
        failed: outcome
            .failed
            .into_iter()
            .map(|(p, e)| (path::join_full(prefix, &p), e))
            .collect(),
    }
}

/// Depth-first, pre-order listing of everything below `dir`.
fn walk_into(driver: &dyn FileSystemDriver, dir: &str, out: &mut Vec<String>) -> FsResult<()> {
    for name in driver.readdir(dir)? {
        let child = child_path(dir, &name);
        let is_dir = driver.filetype(&child)? == Filetype::Directory;
        out.push(child.clone());
        if is_dir {
            walk_into(driver, &child, out)?;
        }
    }
    Ok(())
}

/// Resumes sync on the driver if a batch future is dropped mid-flight.
struct ResumeOnDrop {
    driver: Option<Arc<dyn FileSystemDriver>>,
}

impl Drop for ResumeOnDrop {
    fn drop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = driver.resume_sync().await {
                        warn!(prefix = %driver.prefix(), "resume after dropped batch failed: {e}");
                    }
                });
            }
            Err(_) => warn!(prefix = %driver.prefix(), "batch dropped outside a runtime; sync stays paused"),
        }
    }
}

impl Vfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Facade over an existing mount table.
    pub fn with_mounts(mounts: Arc<MountTable>) -> Self {
        Self { mounts }
    }

    pub fn mount_table(&self) -> &Arc<MountTable> {
        &self.mounts
    }

    fn resolve(&self, full: &str) -> FsResult<Resolved> {
        let full = deconstruct_full_path(full)?;
        let driver = self.mounts.get(&full.prefix)?;
        Ok((driver, full))
    }

    // ========================================================================
    // Mounting
    // ========================================================================

    pub async fn mount(&self, driver: impl FileSystemDriver + 'static) -> FsResult<()> {
        self.mounts.mount(driver).await
    }

    pub async fn mount_arc(&self, driver: Arc<dyn FileSystemDriver>) -> FsResult<()> {
        self.mounts.mount_arc(driver).await
    }

    pub async fn umount(&self, prefix: &str) -> FsResult<()> {
        self.mounts.umount(prefix).await
    }

    /// Unmount everything; persistent drives flush on the way out.
    pub async fn umount_all(&self) -> FsResult<()> {
        self.mounts.umount_all().await
    }

    pub fn mounts(&self) -> Vec<MountInfo> {
        self.mounts.mounts()
    }

    pub fn list(&self) -> Vec<String> {
        self.mounts.list()
    }

    pub fn next_letter(&self) -> Option<String> {
        self.mounts.next_letter()
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn filetype(&self, path: &str) -> FsResult<Filetype> {
        let (driver, p) = self.resolve(path)?;
        driver.filetype(&p.path)
    }

    pub fn exists(&self, path: &str) -> FsResult<bool> {
        let (driver, p) = self.resolve(path)?;
        driver.exists(&p.path)
    }

    pub fn is_file(&self, path: &str) -> FsResult<bool> {
        let (driver, p) = self.resolve(path)?;
        driver.is_file(&p.path)
    }

    pub fn is_empty(&self, path: &str) -> FsResult<bool> {
        let (driver, p) = self.resolve(path)?;
        driver.is_empty(&p.path)
    }

    pub fn stat(&self, path: &str) -> FsResult<Stat> {
        let (driver, p) = self.resolve(path)?;
        driver.stat(&p.path)
    }

    pub fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let (driver, p) = self.resolve(path)?;
        driver.readdir(&p.path)
    }

    /// Every path below `path` as full paths, depth-first, parents before
    /// children. The starting directory itself is not included.
    pub fn walk(&self, path: &str) -> FsResult<Vec<String>> {
        let (driver, p) = self.resolve(path)?;
        let mut found = Vec::new();
        walk_into(driver.as_ref(), &p.path, &mut found)?;
        Ok(found
            .into_iter()
            .map(|child| path::join_full(&p.prefix, &child))
            .collect())
    }

    pub fn usage(&self, prefix: &str) -> FsResult<Usage> {
        self.mounts.get(prefix)?.usage()
    }

    // ========================================================================
    // Content
    // ========================================================================

    pub async fn readbin(&self, path: &str) -> FsResult<Vec<u8>> {
        let (driver, p) = self.resolve(path)?;
        driver.readbin(&p.path).await
    }

    pub async fn readstr(&self, path: &str) -> FsResult<String> {
        let (driver, p) = self.resolve(path)?;
        driver.readstr(&p.path).await
    }

    pub async fn writebin(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let (driver, p) = self.resolve(path)?;
        driver.writebin(&p.path, data).await
    }

    pub async fn writestr(&self, path: &str, text: &str) -> FsResult<()> {
        let (driver, p) = self.resolve(path)?;
        driver.writestr(&p.path, text).await
    }

    /// Full content packaged with a name and guessed MIME type.
    pub async fn to_blob(&self, path: &str) -> FsResult<Blob> {
        let (driver, p) = self.resolve(path)?;
        let data = driver.readbin(&p.path).await?;
        Ok(Blob::new(path::fname(&p.path), data))
    }

    // ========================================================================
    // Structure
    // ========================================================================

    pub async fn mkdir(&self, path: &str) -> FsResult<()> {
        let (driver, p) = self.resolve(path)?;
        driver.mkdir(&p.path).await
    }

    pub async fn touch(&self, path: &str) -> FsResult<()> {
        let (driver, p) = self.resolve(path)?;
        driver.touch(&p.path).await
    }

    pub async fn rm(&self, path: &str) -> FsResult<()> {
        let (driver, p) = self.resolve(path)?;
        driver.rm(&p.path).await
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        let (driver, p) = self.resolve(path)?;
        driver.rmdir(&p.path).await
    }

    pub async fn rename(&self, path: &str, new_name: &str) -> FsResult<()> {
        let (driver, p) = self.resolve(path)?;
        driver.rename(&p.path, new_name).await
    }

    pub async fn set_read_only(&self, path: &str, read_only: bool) -> FsResult<()> {
        let (driver, p) = self.resolve(path)?;
        driver.set_read_only(&p.path, read_only).await
    }

    pub async fn cpfile(&self, src: &str, dest: &str) -> FsResult<()> {
        let (from, s) = self.resolve(src)?;
        let (to, d) = self.resolve(dest)?;
        if s.prefix == d.prefix {
            return from.cpfile(&s.path, &d.path).await;
        }
        copy_file_across(from.as_ref(), &s, to.as_ref(), &d).await
    }

    /// Move a file. Across drives the source stays locked until the
    /// destination write succeeded and the source was removed.
    pub async fn mvfile(&self, src: &str, dest: &str) -> FsResult<()> {
        let (from, s) = self.resolve(src)?;
        let (to, d) = self.resolve(dest)?;
        if s.prefix == d.prefix {
            return from.mvfile(&s.path, &d.path).await;
        }
        let _transfer = self.mounts.transfer_lock().await;
        from.transfer_file(&s.path, to.as_ref(), &d.path).await
    }

    /// Copy a directory tree, continuing past individual failures.
    pub async fn cpdir(&self, src: &str, dest: &str) -> FsResult<BatchOutcome> {
        let (from, s) = self.resolve(src)?;
        let (to, d) = self.resolve(dest)?;
        if s.prefix == d.prefix {
            let outcome = from.cpdir(&s.path, &d.path).await?;
            return Ok(qualify(&s.prefix, outcome));
        }
        copy_tree_across(from.as_ref(), &s, to.as_ref(), &d).await
    }

    /// Move a directory tree.
    ///
    /// Across drives each file moves with [`FileSystemDriver::transfer_file`];
    /// files that fail stay at the source, and source directories are removed
    /// once they are empty.
    pub async fn mvdir(&self, src: &str, dest: &str) -> FsResult<BatchOutcome> {
        let (from, s) = self.resolve(src)?;
        let (to, d) = self.resolve(dest)?;
        if s.prefix == d.prefix {
            let outcome = from.mvdir(&s.path, &d.path).await?;
            return Ok(qualify(&s.prefix, outcome));
        }

        let _transfer = self.mounts.transfer_lock().await;
        if from.filetype(&s.path)? != Filetype::Directory {
            return Err(FsError::not_found(s.to_full()));
        }
        if from.read_only() {
            return Err(FsError::read_only(s.to_full()));
        }
        let mut entries = Vec::new();
        walk_into(from.as_ref(), &s.path, &mut entries)?;
        to.mkdir(&d.path).await?;

        let mut outcome = BatchOutcome::default();
        let mut dirs = vec![s.path.clone()];
        for entry in entries {
            let target = rebase(&entry, &s.path, &d.path);
            let full = path::join_full(&s.prefix, &entry);
            let result = match from.filetype(&entry) {
                Ok(Filetype::Directory) => to.mkdir(&target).await.map(|()| dirs.push(entry)),
                Ok(Filetype::File) => from.transfer_file(&entry, to.as_ref(), &target).await,
                Ok(Filetype::Missing) => Err(FsError::not_found(full.clone())),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => outcome.ok(full),
                Err(e) => outcome.fail(full, e),
            }
        }

        // Deepest first, so emptied parents go after their children.
        dirs.sort_by_key(|d| std::cmp::Reverse(path::depth(d)));
        for dir in dirs {
            if dir != "/" && from.readdir(&dir).is_ok_and(|children| children.is_empty()) {
                if let Err(e) = from.rmdir(&dir).await {
                    outcome.fail(path::join_full(&s.prefix, &dir), e);
                }
            }
        }
        debug!(src = %src, dest = %dest, failed = outcome.failed.len(), "cross-drive mvdir");
        Ok(outcome)
    }

    // ========================================================================
    // Sync batching
    // ========================================================================

    /// Run `f` with sync paused on the drive under `prefix`, resuming (and
    /// flushing once) on every exit path.
    pub async fn batch<T, F, Fut>(&self, prefix: &str, f: F) -> FsResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FsResult<T>>,
    {
        let driver = self.mounts.get(prefix)?;
        driver.pause_sync()?;
        let mut guard = ResumeOnDrop {
            driver: Some(Arc::clone(&driver)),
        };
        let result = f().await;
        guard.driver = None;
        let resumed = driver.resume_sync().await;
        match (result, resumed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), resumed) => {
                if let Err(flush_err) = resumed {
                    warn!(prefix = %prefix, "flush after failed batch also failed: {flush_err}");
                }
                Err(e)
            }
        }
    }
}

async fn copy_file_across(
    from: &dyn FileSystemDriver,
    s: &FullPath,
    to: &dyn FileSystemDriver,
    d: &FullPath,
) -> FsResult<()> {
    if from.filetype(&s.path)? == Filetype::Directory {
        return Err(FsError::is_a_directory(s.to_full()));
    }
    let data = from.readbin(&s.path).await?;
    to.writebin(&d.path, &data).await
}

/// Copy `s` to `d` on another drive, entry by entry.
async fn copy_tree_across(
    from: &dyn FileSystemDriver,
    s: &FullPath,
    to: &dyn FileSystemDriver,
    d: &FullPath,
) -> FsResult<BatchOutcome> {
    if from.filetype(&s.path)? != Filetype::Directory {
        return Err(FsError::not_found(s.to_full()));
    }
    let mut entries = Vec::new();
    walk_into(from, &s.path, &mut entries)?;
    to.mkdir(&d.path).await?;

    let mut outcome = BatchOutcome::default();
    for entry in entries {
        let target = rebase(&entry, &s.path, &d.path);
        let full = path::join_full(&s.prefix, &entry);
        let result = match from.filetype(&entry) {
            Ok(Filetype::Directory) => to.mkdir(&target).await,
            Ok(Filetype::File) => match from.readbin(&entry).await {
                Ok(data) => to.writebin(&target, &data).await,
                Err(e) => Err(e),
            },
            Ok(Filetype::Missing) => Err(FsError::not_found(full.clone())),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => outcome.ok(full),
            Err(e) => outcome.fail(full, e),
        }
    }
    Ok(outcome)
}
