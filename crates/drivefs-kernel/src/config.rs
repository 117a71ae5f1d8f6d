//! Declarative drive configuration (RON).
//!
//! ```ron
//! (
//!     reserved: ["a", "b"],
//!     mounts: [
//!         (driver: LocalStorage(path: "drives.db"), prefix: Some("c")),
//!         (driver: Ram, prefix: None),
//!         (driver: Remote(origin: "https://example.org/sys"), prefix: Some("w")),
//!     ],
//! )
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::vfs::backends::{
    IndexedOptions, LocalStorageFileSystem, RamFileSystem, RemoteOptions, RemoteReadOnlyFileSystem,
};
use crate::vfs::{FileSystemDriver, FsError, MountTable, Vfs, mount::DEFAULT_RESERVED};

fn default_manifest() -> String {
    "/manifest.json".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_reserved() -> Vec<String> {
    DEFAULT_RESERVED.iter().map(|s| s.to_string()).collect()
}

/// Backend of one configured drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverConfig {
    /// Ephemeral, in-process.
    Ram,
    /// Durable, in a SQLite file shared by all local-storage drives.
    LocalStorage { path: PathBuf },
    /// Read-only, manifest-backed, fetched over HTTP.
    Remote {
        origin: String,
        #[serde(default = "default_manifest")]
        manifest: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_true")]
        cache: bool,
    },
}

/// One drive to mount at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub driver: DriverConfig,
    /// Drive letter; `None` takes the next free one.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_true")]
    pub sort_entries: bool,
}

/// Whole configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfsConfig {
    #[serde(default = "default_reserved")]
    pub reserved: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
}

impl Default for VfsConfig {
    /// One RAM drive at `c`.
    fn default() -> Self {
        Self {
            reserved: default_reserved(),
            mounts: vec![MountConfig {
                driver: DriverConfig::Ram,
                prefix: Some("c".to_string()),
                sort_entries: true,
            }],
        }
    }
}

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Fs(#[from] FsError),
}

impl VfsConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: VfsConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Reject duplicate explicit prefixes before anything is mounted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for mount in &self.mounts {
            if let Some(prefix) = &mount.prefix {
                let prefix = crate::vfs::path::normalize_prefix(prefix)?;
                if !seen.insert(prefix.clone()) {
                    return Err(ConfigError::Invalid(format!("prefix {prefix} listed twice")));
                }
            }
        }
        Ok(())
    }
}

impl MountConfig {
    /// Construct the driver this entry describes, under `prefix`.
    pub fn build(&self, prefix: &str) -> Result<Arc<dyn FileSystemDriver>, ConfigError> {
        let indexed = IndexedOptions {
            sort_entries: self.sort_entries,
            ..Default::default()
        };
        let driver: Arc<dyn FileSystemDriver> = match &self.driver {
            DriverConfig::Ram => Arc::new(RamFileSystem::new(prefix).with_options(indexed)),
            DriverConfig::LocalStorage { path } => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Arc::new(LocalStorageFileSystem::open(prefix, path)?.with_options(indexed))
            }
            DriverConfig::Remote {
                origin,
                manifest,
                timeout_secs,
                cache,
            } => {
                let options = RemoteOptions {
                    origin: origin.clone(),
                    manifest: manifest.clone(),
                    timeout: Duration::from_secs(*timeout_secs),
                    cache: *cache,
                    sort_entries: self.sort_entries,
                };
                Arc::new(RemoteReadOnlyFileSystem::new(prefix, options)?)
            }
        };
        Ok(driver)
    }
}

impl Vfs {
    /// Mount every configured drive in order, stopping at the first failure.
    pub async fn from_config(config: &VfsConfig) -> Result<Vfs, ConfigError> {
        config.validate()?;
        let vfs = Vfs::with_mounts(Arc::new(MountTable::with_reserved(&config.reserved)));
        let table = vfs.mount_table();

        // Explicit prefixes first, so automatic ones cannot steal them.
        let (explicit, automatic): (Vec<_>, Vec<_>) =
            config.mounts.iter().partition(|m| m.prefix.is_some());
        for mount in explicit.into_iter().chain(automatic) {
            let prefix = match &mount.prefix {
                Some(prefix) => prefix.clone(),
                None => table
                    .next_letter()
                    .ok_or_else(|| ConfigError::Invalid("no free drive letter".to_string()))?,
            };
            table.mount_arc(mount.build(&prefix)?).await?;
        }
        info!(drives = ?table.list(), "configured drives mounted");
        Ok(vfs)
    }
}
