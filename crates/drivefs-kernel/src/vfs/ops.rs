//! Driver capability contract.
//!
//! Every backend mounted under a drive prefix implements [`FileSystemDriver`].
//! Paths handed to a driver are already normalized in-drive paths
//! (`/docs/a.txt`); the facade strips the prefix before dispatching.

use async_trait::async_trait;

use super::error::{BatchOutcome, FsError, FsResult};
use super::lifecycle::DriverState;
use super::path;
use super::types::{DriverKind, Filetype, Stat, Usage};

/// Capability set shared by all backends.
///
/// Metadata queries are synchronous because every driver keeps its metadata
/// resident; content access and mutations are asynchronous.
#[async_trait]
pub trait FileSystemDriver: Send + Sync {
    // ========================================================================
    // Identity and lifecycle
    // ========================================================================

    /// Drive prefix this driver is mounted under.
    fn prefix(&self) -> &str;

    /// Backend family.
    fn kind(&self) -> DriverKind;

    /// Returns true if every mutation fails with `ReadOnly`.
    fn read_only(&self) -> bool;

    /// Returns true if content lives behind a network boundary.
    fn remote(&self) -> bool {
        matches!(self.kind(), DriverKind::RemoteReadOnly)
    }

    fn state(&self) -> DriverState;

    /// Load metadata and become `Ready`.
    async fn init(&self) -> FsResult<()>;

    /// Flush, release resources and become `Closed`.
    async fn uninit(&self) -> FsResult<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Tri-state lookup. A missing path is `Filetype::Missing`, never an error.
    fn filetype(&self, path: &str) -> FsResult<Filetype>;

    fn stat(&self, path: &str) -> FsResult<Stat>;

    /// Immediate child names of a directory.
    fn readdir(&self, path: &str) -> FsResult<Vec<String>>;

    fn usage(&self) -> FsResult<Usage>;

    // ========================================================================
    // Content
    // ========================================================================

    async fn readbin(&self, path: &str) -> FsResult<Vec<u8>>;

    /// Truncating write; the previous content is replaced entirely.
    async fn writebin(&self, path: &str, data: &[u8]) -> FsResult<()>;

    // ========================================================================
    // Structure
    // ========================================================================

    /// Create a directory and any missing parents.
    async fn mkdir(&self, path: &str) -> FsResult<()>;

    /// Create an empty file, or bump the modification time of an existing one.
    async fn touch(&self, path: &str) -> FsResult<()>;

    /// Remove a file.
    async fn rm(&self, path: &str) -> FsResult<()>;

    /// Remove a directory and everything under it.
    async fn rmdir(&self, path: &str) -> FsResult<()>;

    async fn cpfile(&self, src: &str, dest: &str) -> FsResult<()>;

    async fn cpdir(&self, src: &str, dest: &str) -> FsResult<BatchOutcome>;

    async fn mvfile(&self, src: &str, dest: &str) -> FsResult<()>;

    async fn mvdir(&self, src: &str, dest: &str) -> FsResult<BatchOutcome>;

    /// Move a file to `dest_path` on another driver.
    ///
    /// The source path stays locked from the read until it is removed, so a
    /// write to it cannot land between the copy and the delete. The source is
    /// removed only after `dest` accepted the content.
    async fn transfer_file(
        &self,
        path: &str,
        dest: &dyn FileSystemDriver,
        dest_path: &str,
    ) -> FsResult<()>;

    /// Toggle the per-entry read-only flag.
    async fn set_read_only(&self, path: &str, read_only: bool) -> FsResult<()>;

    // ========================================================================
    // Sync batching
    // ========================================================================

    /// Suspend persistence flushes. Drivers without persistence accept and
    /// ignore the call.
    fn pause_sync(&self) -> FsResult<()> {
        Ok(())
    }

    /// Re-enable flushing and persist everything changed while paused.
    async fn resume_sync(&self) -> FsResult<()> {
        Ok(())
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    fn exists(&self, path: &str) -> FsResult<bool> {
        Ok(self.filetype(path)? != Filetype::Missing)
    }

    fn is_file(&self, path: &str) -> FsResult<bool> {
        Ok(self.filetype(path)? == Filetype::File)
    }

    /// Zero-length file, or directory without children.
    fn is_empty(&self, path: &str) -> FsResult<bool> {
        match self.filetype(path)? {
            Filetype::File => Ok(self.stat(path)?.length == 0),
            Filetype::Directory => Ok(self.readdir(path)?.is_empty()),
            Filetype::Missing => Err(FsError::not_found(path)),
        }
    }

    async fn readstr(&self, path: &str) -> FsResult<String> {
        let data = self.readbin(path).await?;
        String::from_utf8(data).map_err(|_| FsError::io(format!("not valid UTF-8: {path}")))
    }

    async fn writestr(&self, path: &str, text: &str) -> FsResult<()> {
        self.writebin(path, text.as_bytes()).await
    }

    /// Rename within the same directory.
    async fn rename(&self, path: &str, new_name: &str) -> FsResult<()> {
        if new_name.is_empty() || new_name.contains('/') || new_name == "." || new_name == ".." {
            return Err(FsError::invalid_path(format!("bad name: {new_name:?}")));
        }
        let dest = path::child_path(&path::parent_path(path), new_name);
        match self.filetype(path)? {
            Filetype::File => self.mvfile(path, &dest).await,
            Filetype::Directory => {
                let outcome = self.mvdir(path, &dest).await?;
                match outcome.failed.into_iter().next() {
                    Some((_, err)) => Err(err),
                    None => Ok(()),
                }
            }
            Filetype::Missing => Err(FsError::not_found(path)),
        }
    }
}
