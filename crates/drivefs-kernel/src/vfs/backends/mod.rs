//! Drive backends.
//!
//! Persistent drives are one [`IndexedFileSystem`] over different
//! [`KvStore`]s; the remote drive is read-only and manifest-backed.

mod indexed;
mod local;
mod memory;
mod remote;
mod store;

pub use indexed::{FileTable, IndexedFileSystem, IndexedOptions, RECORD_PREFIX, TABLE_KEY};
pub use local::{LocalStorageFileSystem, SqliteStore};
pub use memory::{MemoryStore, RamFileSystem};
pub use remote::{
    Fetcher, HttpFetcher, RemoteOptions, RemoteReadOnlyFileSystem, parse_manifest,
};
pub use store::KvStore;
