//! VFS error types.

use std::io;
use thiserror::Error;

/// VFS error type.
///
/// Drivers never swallow these; the facade passes them through untouched.
#[derive(Debug, Error)]
pub enum FsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Mutation attempted on a read-only driver or entry.
    #[error("read-only: {0}")]
    ReadOnly(String),

    /// A drive is already mounted under this prefix.
    #[error("prefix in use: {0}")]
    PrefixInUse(String),

    /// No drive mounted under this prefix.
    #[error("prefix not mounted: {0}")]
    PrefixNotFound(String),

    /// Malformed path or prefix.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Driver has not finished `init()`.
    #[error("driver not ready: {0}")]
    NotReady(String),

    /// Driver was unmounted.
    #[error("driver closed: {0}")]
    Closed(String),

    /// Sync is already paused by another batch.
    #[error("busy: {0}")]
    Busy(String),

    /// Store or network failure.
    #[error("I/O failure: {0}")]
    Io(String),
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a ReadOnly error.
    pub fn read_only(path: impl Into<String>) -> Self {
        Self::ReadOnly(path.into())
    }

    /// Create a PrefixInUse error.
    pub fn prefix_in_use(prefix: impl Into<String>) -> Self {
        Self::PrefixInUse(prefix.into())
    }

    /// Create a PrefixNotFound error.
    pub fn prefix_not_found(prefix: impl Into<String>) -> Self {
        Self::PrefixNotFound(prefix.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a NotReady error.
    pub fn not_ready(prefix: impl Into<String>) -> Self {
        Self::NotReady(prefix.into())
    }

    /// Create a Closed error.
    pub fn closed(prefix: impl Into<String>) -> Self {
        Self::Closed(prefix.into())
    }

    /// Create an Io error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Returns true for errors caused by the driver lifecycle rather than the path.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, FsError::NotReady(_) | FsError::Closed(_))
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        FsError::Io(e.to_string())
    }
}

impl From<rusqlite::Error> for FsError {
    fn from(e: rusqlite::Error) -> Self {
        FsError::Io(format!("sqlite: {e}"))
    }
}

impl From<serde_json::Error> for FsError {
    fn from(e: serde_json::Error) -> Self {
        FsError::Io(format!("json: {e}"))
    }
}

impl From<reqwest::Error> for FsError {
    fn from(e: reqwest::Error) -> Self {
        FsError::Io(format!("fetch: {e}"))
    }
}

impl From<tokio::task::JoinError> for FsError {
    fn from(e: tokio::task::JoinError) -> Self {
        FsError::Io(format!("blocking task: {e}"))
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            FsError::ReadOnly(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            FsError::PrefixInUse(msg) => io::Error::new(io::ErrorKind::AddrInUse, msg),
            FsError::PrefixNotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::NotReady(msg) | FsError::Busy(msg) => {
                io::Error::new(io::ErrorKind::WouldBlock, msg)
            }
            FsError::Closed(msg) => io::Error::new(io::ErrorKind::BrokenPipe, msg),
            FsError::Io(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type FsResult<T> = Result<T, FsError>;

/// Result of a directory-scoped batch (`cpdir`, `mvdir`).
///
/// Batches continue past individual failures; `failed` lists every child
/// that did not make it.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Paths handled successfully.
    pub done: Vec<String>,
    /// Paths that failed, with the reason.
    pub failed: Vec<(String, FsError)>,
}

impl BatchOutcome {
    /// True when no child failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn ok(&mut self, path: impl Into<String>) {
        self.done.push(path.into());
    }

    pub(crate) fn fail(&mut self, path: impl Into<String>, err: FsError) {
        self.failed.push((path.into(), err));
    }

    pub(crate) fn extend(&mut self, other: BatchOutcome) {
        self.done.extend(other.done);
        self.failed.extend(other.failed);
    }
}
