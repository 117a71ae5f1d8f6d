//! Drive-letter virtual file system.
//!
//! Key components:
//!
//! - [`FileSystemDriver`] - Capability contract every backend implements
//! - [`MountTable`] - Maps drive prefixes to drivers and owns their lifecycle
//! - [`Vfs`] - Facade resolving `prefix:/path` and bridging drives
//! - [`backends`] - RAM, local-storage (SQLite) and remote read-only drives
//!
//! ## Design Decisions
//!
//! - **Directories are derived**: persistent drives keep one flat
//!   path → entry table; `readdir` is a parent-path match over it.
//! - **Whole-table flushes**: every mutation rewrites the table unless sync
//!   is paused, in which case one flush happens on resume.
//! - **Explicit registry**: the mount table is an owned object handed to the
//!   facade, never process-global state.

pub mod backends;
mod error;
mod facade;
mod lifecycle;
mod locks;
pub mod mount;
mod ops;
pub mod path;
mod types;

pub use error::{BatchOutcome, FsError, FsResult};
pub use facade::Vfs;
pub use lifecycle::{DriverState, Lifecycle};
pub use locks::{PathGuard, PathLocks};
pub use mount::{MountRecord, MountTable};
pub use ops::FileSystemDriver;
pub use path::FullPath;
pub use types::{
    Blob, DriverKind, EntryType, FileTableEntry, Filetype, Millis, MountInfo, Stat, Usage,
    mime_for_extension, now_millis,
};
