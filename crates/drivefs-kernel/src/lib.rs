//! # drivefs-kernel
//!
//! Drive-letter virtual file system: pluggable storage drivers mounted under
//! short prefixes (`c:`, `w:`) and reached through one path namespace.
//!
//! ```no_run
//! # async fn demo() -> drivefs_kernel::FsResult<()> {
//! use drivefs_kernel::{RamFileSystem, Vfs};
//!
//! let vfs = Vfs::new();
//! vfs.mount(RamFileSystem::new("c")).await?;
//! vfs.writestr("c:/docs/a.txt", "hello").await?;
//! assert_eq!(vfs.readdir("c:/docs")?, vec!["a.txt"]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod vfs;

pub use config::{ConfigError, DriverConfig, MountConfig, VfsConfig};
pub use vfs::{
    BatchOutcome, Blob, DriverKind, DriverState, EntryType, FileSystemDriver, Filetype, FsError,
    FsResult, MountInfo, MountTable, Stat, Usage, Vfs,
    backends::{
        IndexedFileSystem, IndexedOptions, KvStore, LocalStorageFileSystem, MemoryStore,
        RamFileSystem, RemoteOptions, RemoteReadOnlyFileSystem, SqliteStore,
    },
};
