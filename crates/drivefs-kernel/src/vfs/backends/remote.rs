//! Read-only drive over static content served from an origin.
//!
//! `init()` fetches a JSON manifest listing every path with its length and
//! type; content is fetched lazily from `origin + path` on read. Every
//! mutation fails with `ReadOnly`.

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::indexed::{FileTable, fresh_table};
use crate::vfs::error::{BatchOutcome, FsError, FsResult};
use crate::vfs::lifecycle::{DriverState, Lifecycle};
use crate::vfs::ops::FileSystemDriver;
use crate::vfs::path::{self, normalize, parent_path};
use crate::vfs::types::{DriverKind, EntryType, FileTableEntry, Filetype, Stat, Usage};

/// Fetches raw bytes by URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FsResult<Vec<u8>>;
}

/// [`Fetcher`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> FsResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FsResult<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Where the drive's content lives.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    /// Base URL; content for `/a/b` is fetched from `{origin}/a/b`.
    pub origin: String,
    /// Manifest location relative to the origin, e.g. `/manifest.json`.
    pub manifest: String,
    /// Network timeout for the default HTTP fetcher.
    pub timeout: Duration,
    /// Keep fetched content in memory until `uninit()`.
    pub cache: bool,
    pub sort_entries: bool,
}

impl RemoteOptions {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            manifest: "/manifest.json".to_string(),
            timeout: Duration::from_secs(30),
            cache: true,
            sort_entries: true,
        }
    }

    /// `origin` followed by the segments of an absolute path, each
    /// percent-encoded, so names holding `#`, `?` or `%` address their own file.
    pub fn url_for(&self, path: &str) -> FsResult<String> {
        let mut url = reqwest::Url::parse(&self.origin)
            .map_err(|e| FsError::io(format!("invalid origin {}: {e}", self.origin)))?;
        url.path_segments_mut()
            .map_err(|()| FsError::io(format!("origin {} cannot carry a path", self.origin)))?
            .pop_if_empty()
            .extend(normalize(path).split('/').filter(|segment| !segment.is_empty()));
        Ok(url.into())
    }
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    length: u64,
    #[serde(rename = "type")]
    kind: EntryType,
}

/// Build a read-only file table from a manifest document.
///
/// Missing intermediate directories are synthesized. A path listed beneath
/// something the manifest declares as a file is rejected, in either order.
pub fn parse_manifest(bytes: &[u8]) -> FsResult<FileTable> {
    let manifest: IndexMap<String, ManifestEntry> = serde_json::from_slice(bytes)?;
    let mut table = fresh_table();
    if let Some(root) = table.get_mut("/") {
        root.read_only = true;
    }

    for (raw, item) in manifest {
        let path = normalize(&raw);
        if path == "/" {
            continue;
        }

        let mut parents = Vec::new();
        let mut current = parent_path(&path);
        while current != "/" {
            parents.push(current.clone());
            current = parent_path(&current);
        }
        for dir in parents.into_iter().rev() {
            match table.get(&dir) {
                Some(entry) if !entry.is_dir() => {
                    return Err(FsError::io(format!("manifest lists {path} under file {dir}")));
                }
                Some(_) => {}
                None => {
                    let mut entry = FileTableEntry::directory();
                    entry.read_only = true;
                    table.insert(dir, entry);
                }
            }
        }

        if item.kind != EntryType::Directory
            && table.get(&path).is_some_and(|existing| existing.is_dir())
        {
            return Err(FsError::io(format!(
                "manifest lists {path} as a file but also lists entries under it"
            )));
        }

        let mut entry = FileTableEntry::directory();
        entry.kind = item.kind;
        entry.length = if item.kind == EntryType::File {
            item.length
        } else {
            0
        };
        entry.read_only = true;
        table.insert(path, entry);
    }
    Ok(table)
}

/// Manifest-backed, read-only driver.
pub struct RemoteReadOnlyFileSystem<F = HttpFetcher> {
    prefix: String,
    options: RemoteOptions,
    fetcher: F,
    lifecycle: Lifecycle,
    table: RwLock<FileTable>,
    cache: DashMap<String, Vec<u8>>,
}

impl<F> std::fmt::Debug for RemoteReadOnlyFileSystem<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteReadOnlyFileSystem")
            .field("prefix", &self.prefix)
            .field("origin", &self.options.origin)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl RemoteReadOnlyFileSystem<HttpFetcher> {
    /// Remote drive fetching over HTTP with the configured timeout.
    pub fn new(prefix: impl Into<String>, options: RemoteOptions) -> FsResult<Self> {
        let fetcher = HttpFetcher::new(options.timeout)?;
        Ok(Self::with_fetcher(prefix, options, fetcher))
    }
}

impl<F: Fetcher> RemoteReadOnlyFileSystem<F> {
    pub fn with_fetcher(prefix: impl Into<String>, options: RemoteOptions, fetcher: F) -> Self {
        let prefix = prefix.into().to_ascii_lowercase();
        Self {
            lifecycle: Lifecycle::new(prefix.clone()),
            prefix,
            options,
            fetcher,
            table: RwLock::new(FileTable::new()),
            cache: DashMap::new(),
        }
    }

    pub fn options(&self) -> &RemoteOptions {
        &self.options
    }

    /// Number of cached content entries.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn read_only_error(&self, path: &str) -> FsError {
        FsError::read_only(path::join_full(&self.prefix, &normalize(path)))
    }

    fn entry(&self, path: &str) -> Option<FileTableEntry> {
        self.table.read().get(path).cloned()
    }

    async fn load_manifest(&self) -> FsResult<FileTable> {
        let url = self.options.url_for(&self.options.manifest)?;
        debug!(url = %url, "fetching manifest");
        let bytes = self.fetcher.fetch(&url).await?;
        parse_manifest(&bytes)
    }
}

#[async_trait]
impl<F: Fetcher + 'static> FileSystemDriver for RemoteReadOnlyFileSystem<F> {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn kind(&self) -> DriverKind {
        DriverKind::RemoteReadOnly
    }

    fn read_only(&self) -> bool {
        true
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    #[tracing::instrument(skip(self), fields(prefix = %self.prefix, origin = %self.options.origin), name = "remote.init")]
    async fn init(&self) -> FsResult<()> {
        if !self.lifecycle.begin_init()? {
            return Ok(());
        }
        match self.load_manifest().await {
            Ok(table) => {
                info!(entries = table.len(), "manifest loaded");
                *self.table.write() = table;
                self.lifecycle.finish_init(true);
                Ok(())
            }
            Err(e) => {
                warn!(manifest = %self.options.manifest, "manifest load failed: {e}");
                self.lifecycle.finish_init(false);
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip(self), fields(prefix = %self.prefix), name = "remote.uninit")]
    async fn uninit(&self) -> FsResult<()> {
        let Some(gate) = self.lifecycle.begin_uninit().await else {
            return Ok(());
        };
        self.cache.clear();
        self.table.write().clear();
        drop(gate);
        self.lifecycle.finish_uninit();
        Ok(())
    }

    fn filetype(&self, path: &str) -> FsResult<Filetype> {
        self.lifecycle.check()?;
        Ok(Filetype::from(
            self.table.read().get(&normalize(path)).map(|e| e.kind),
        ))
    }

    fn stat(&self, path: &str) -> FsResult<Stat> {
        self.lifecycle.check()?;
        let path = normalize(path);
        self.table
            .read()
            .get(&path)
            .map(Stat::from)
            .ok_or_else(|| FsError::not_found(path::join_full(&self.prefix, &path)))
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        self.lifecycle.check()?;
        let path = normalize(path);
        let table = self.table.read();
        if !table.get(&path).is_some_and(|e| e.is_dir()) {
            return Err(FsError::not_found(path::join_full(&self.prefix, &path)));
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
        let mut usage = Usage::default();
        for entry in self.table.read().values() {
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
        let _op = self.lifecycle.enter().await?;
        let path = normalize(path);
        let entry = self
            .entry(&path)
            .ok_or_else(|| FsError::not_found(path::join_full(&self.prefix, &path)))?;
        match entry.kind {
            EntryType::Directory => {
                return Err(FsError::is_a_directory(path::join_full(&self.prefix, &path)));
            }
            EntryType::Empty => return Ok(Vec::new()),
            EntryType::File => {}
        }

        if let Some(hit) = self.cache.get(&path) {
            return Ok(hit.value().clone());
        }
        let url = self.options.url_for(&path)?;
        debug!(prefix = %self.prefix, url = %url, "fetch");
        let data = self.fetcher.fetch(&url).await?;
        if data.len() as u64 != entry.length {
            debug!(
                prefix = %self.prefix,
                path = %path,
                expected = entry.length,
                actual = data.len(),
                "content length differs from manifest"
            );
        }
        if self.options.cache {
            self.cache.insert(path, data.clone());
        }
        Ok(data)
    }

    async fn writebin(&self, path: &str, _data: &[u8]) -> FsResult<()> {
        self.lifecycle.check()?;
        Err(self.read_only_error(path))
    }

    async fn mkdir(&self, path: &str) -> FsResult<()> {
        self.lifecycle.check()?;
        Err(self.read_only_error(path))
    }

    async fn touch(&self, path: &str) -> FsResult<()> {
        self.lifecycle.check()?;
        Err(self.read_only_error(path))
    }

    async fn rm(&self, path: &str) -> FsResult<()> {
        self.lifecycle.check()?;
        Err(self.read_only_error(path))
    }

    async fn rmdir(&self, path: &str) -> FsResult<()> {
        self.lifecycle.check()?;
        Err(self.read_only_error(path))
    }

    async fn cpfile(&self, _src: &str, dest: &str) -> FsResult<()> {
        self.lifecycle.check()?;
        Err(self.read_only_error(dest))
    }

    async fn cpdir(&self, _src: &str, dest: &str) -> FsResult<BatchOutcome> {
        self.lifecycle.check()?;
        Err(self.read_only_error(dest))
    }

    async fn mvfile(&self, src: &str, _dest: &str) -> FsResult<()> {
        self.lifecycle.check()?;
        Err(self.read_only_error(src))
    }

    async fn mvdir(&self, src: &str, _dest: &str) -> FsResult<BatchOutcome> {
        self.lifecycle.check()?;
        Err(self.read_only_error(src))
    }

    async fn transfer_file(
        &self,
        path: &str,
        _dest: &dyn FileSystemDriver,
        _dest_path: &str,
    ) -> FsResult<()> {
        self.lifecycle.check()?;
        Err(self.read_only_error(path))
    }

    async fn set_read_only(&self, path: &str, _read_only: bool) -> FsResult<()> {
        self.lifecycle.check()?;
        Err(self.read_only_error(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ORIGIN: &str = "https://static.example/sys/";

    /// Serves canned responses and counts fetches.
    #[derive(Default)]
    struct MapFetcher {
        responses: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.responses.insert(url.to_string(), body.to_vec());
            self
        }
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> FsResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| FsError::io(format!("404 {url}")))
        }
    }

    fn manifest() -> &'static [u8] {
        br#"{
            "/readme.txt": { "length": 5, "type": "file" },
            "/apps/calc/app.js": { "length": 12, "type": "file" },
            "/apps/empty.txt": { "length": 0, "type": "empty" },
            "/assets": { "length": 0, "type": "directory" }
        }"#
    }

    fn fetcher() -> MapFetcher {
        MapFetcher::default()
            .with("https://static.example/sys/manifest.json", manifest())
            .with("https://static.example/sys/readme.txt", b"hello")
            .with("https://static.example/sys/apps/calc/app.js", b"console.log;")
    }

    async fn mounted(options: RemoteOptions) -> RemoteReadOnlyFileSystem<MapFetcher> {
        let fs = RemoteReadOnlyFileSystem::with_fetcher("w", options, fetcher());
        fs.init().await.unwrap();
        fs
    }

    #[test]
    fn test_url_for() {
        let options = RemoteOptions::new(ORIGIN);
        assert_eq!(options.url_for("/a/b.txt").unwrap(), "https://static.example/sys/a/b.txt");
        assert_eq!(options.url_for("x").unwrap(), "https://static.example/sys/x");

        let bare = RemoteOptions::new("https://static.example");
        assert_eq!(bare.url_for("/manifest.json").unwrap(), "https://static.example/manifest.json");
    }

    #[test]
    fn test_url_for_encodes_segments() {
        let options = RemoteOptions::new(ORIGIN);
        assert_eq!(
            options.url_for("/notes/a#1?.txt").unwrap(),
            "https://static.example/sys/notes/a%231%3F.txt"
        );
        assert_eq!(
            options.url_for("/my docs/50%.txt").unwrap(),
            "https://static.example/sys/my%20docs/50%25.txt"
        );
        assert!(matches!(
            RemoteOptions::new("not a url").url_for("/x"),
            Err(FsError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_names_with_reserved_characters() {
        let fetcher = MapFetcher::default()
            .with(
                "https://static.example/sys/manifest.json",
                br#"{ "/a#b.txt": { "length": 2, "type": "file" } }"#,
            )
            .with("https://static.example/sys/a%23b.txt", b"ok")
            .with("https://static.example/sys/a", b"wrong");
        let fs = RemoteReadOnlyFileSystem::with_fetcher("w", RemoteOptions::new(ORIGIN), fetcher);
        fs.init().await.unwrap();
        assert_eq!(fs.readstr("/a#b.txt").await.unwrap(), "ok");
    }

    #[test]
    fn test_parse_manifest_synthesizes_dirs() {
        let table = parse_manifest(manifest()).unwrap();
        assert!(table["/apps"].is_dir());
        assert!(table["/apps/calc"].is_dir());
        assert_eq!(table["/apps/calc/app.js"].length, 12);
        assert_eq!(table["/apps/empty.txt"].kind, EntryType::Empty);
        assert!(table.values().all(|e| e.read_only && e.record_id.is_none()));
    }

    #[test]
    fn test_parse_manifest_rejects_child_of_file() {
        let bad = br#"{
            "/a": { "length": 1, "type": "file" },
            "/a/b": { "length": 1, "type": "file" }
        }"#;
        assert!(matches!(parse_manifest(bad), Err(FsError::Io(_))));

        let child_first = br#"{
            "/a/b.txt": { "length": 1, "type": "file" },
            "/a": { "length": 1, "type": "file" }
        }"#;
        assert!(matches!(parse_manifest(child_first), Err(FsError::Io(_))));

        let listed_dir = br#"{
            "/a/b.txt": { "length": 1, "type": "file" },
            "/a": { "length": 0, "type": "directory" }
        }"#;
        let table = parse_manifest(listed_dir).unwrap();
        assert!(table["/a"].is_dir());
        assert!(table.contains_key("/a/b.txt"));
    }

    #[tokio::test]
    async fn test_reads_reflect_manifest() {
        let fs = mounted(RemoteOptions::new(ORIGIN)).await;
        assert_eq!(fs.readdir("/").unwrap(), vec!["apps", "assets", "readme.txt"]);
        assert_eq!(fs.readdir("/apps").unwrap(), vec!["calc", "empty.txt"]);
        assert_eq!(fs.filetype("/assets").unwrap(), Filetype::Directory);
        assert_eq!(fs.filetype("/nope").unwrap(), Filetype::Missing);

        let stat = fs.stat("/readme.txt").unwrap();
        assert_eq!(stat.length, 5);
        assert!(stat.read_only);
        assert!(stat.record_id.is_none());

        assert_eq!(fs.readstr("/readme.txt").await.unwrap(), "hello");
        assert_eq!(fs.readstr("/apps/empty.txt").await.unwrap(), "");
        assert!(matches!(fs.readbin("/apps").await, Err(FsError::IsADirectory(_))));
        assert!(matches!(fs.readbin("/missing").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_every_mutation_is_read_only() {
        let fs = mounted(RemoteOptions::new(ORIGIN)).await;
        assert!(fs.read_only());
        assert!(fs.remote());
        assert!(matches!(fs.writestr("/readme.txt", "x").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.writebin("/new", b"x").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.mkdir("/d").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.touch("/t").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.rm("/readme.txt").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.rmdir("/apps").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.cpfile("/readme.txt", "/b").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.cpdir("/apps", "/b").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.mvfile("/readme.txt", "/b").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.mvdir("/apps", "/b").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.rename("/readme.txt", "b").await, Err(FsError::ReadOnly(_))));
        assert!(matches!(fs.set_read_only("/readme.txt", false).await, Err(FsError::ReadOnly(_))));
        let other = crate::vfs::backends::RamFileSystem::new("c");
        other.init().await.unwrap();
        assert!(matches!(
            fs.transfer_file("/readme.txt", &other, "/readme.txt").await,
            Err(FsError::ReadOnly(_))
        ));
        assert!(!other.exists("/readme.txt").unwrap());
        assert_eq!(fs.readstr("/readme.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_cache_avoids_refetch() {
        let fs = mounted(RemoteOptions::new(ORIGIN)).await;
        let before = fs.fetcher.calls.load(Ordering::SeqCst);
        fs.readbin("/readme.txt").await.unwrap();
        fs.readbin("/readme.txt").await.unwrap();
        assert_eq!(fs.fetcher.calls.load(Ordering::SeqCst), before + 1);
        assert_eq!(fs.cached(), 1);

        fs.uninit().await.unwrap();
        assert_eq!(fs.cached(), 0);
    }

    #[tokio::test]
    async fn test_uncached_fetches_every_read() {
        let options = RemoteOptions {
            cache: false,
            ..RemoteOptions::new(ORIGIN)
        };
        let fs = mounted(options).await;
        let before = fs.fetcher.calls.load(Ordering::SeqCst);
        fs.readbin("/readme.txt").await.unwrap();
        fs.readbin("/readme.txt").await.unwrap();
        assert_eq!(fs.fetcher.calls.load(Ordering::SeqCst), before + 2);
    }

    #[tokio::test]
    async fn test_missing_manifest_fails_init() {
        let fs = RemoteReadOnlyFileSystem::with_fetcher(
            "w",
            RemoteOptions::new("https://elsewhere.example"),
            MapFetcher::default(),
        );
        assert!(matches!(fs.init().await, Err(FsError::Io(_))));
        assert_eq!(fs.state(), DriverState::Unmounted);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_io() {
        let fs = RemoteReadOnlyFileSystem::with_fetcher(
            "w",
            RemoteOptions::new(ORIGIN),
            MapFetcher::default().with("https://static.example/sys/manifest.json", manifest()),
        );
        fs.init().await.unwrap();
        assert!(matches!(fs.readbin("/readme.txt").await, Err(FsError::Io(_))));
    }
}
