//! Core VFS types.
//!
//! `FileTableEntry` is what persistent drivers serialize into their store,
//! so its serde shape is part of the on-disk format.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of a file table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Regular file with content stored under a record id.
    File,
    /// Directory.
    Directory,
    /// Zero-length file. Has no content record.
    Empty,
}

impl EntryType {
    /// Returns true for regular and empty files.
    pub fn is_file(&self) -> bool {
        matches!(self, EntryType::File | EntryType::Empty)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryType::Directory)
    }
}

/// Result of a `filetype` lookup. Missing paths are a value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filetype {
    File,
    Directory,
    Missing,
}

impl From<Option<EntryType>> for Filetype {
    fn from(kind: Option<EntryType>) -> Self {
        match kind {
            Some(EntryType::Directory) => Filetype::Directory,
            Some(_) => Filetype::File,
            None => Filetype::Missing,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or(0)
}

/// One path's metadata in a mounted file system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTableEntry {
    /// Content length in bytes (0 for directories and empty files).
    pub length: u64,
    pub date_created: Millis,
    pub date_modified: Millis,
    pub date_accessed: Millis,
    /// When set, every mutation of this entry fails.
    #[serde(default)]
    pub read_only: bool,
    #[serde(rename = "type")]
    pub kind: EntryType,
    /// Key of the content blob; present iff `kind == File`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

impl FileTableEntry {
    /// A fresh directory entry.
    pub fn directory() -> Self {
        let now = now_millis();
        Self {
            length: 0,
            date_created: now,
            date_modified: now,
            date_accessed: now,
            read_only: false,
            kind: EntryType::Directory,
            record_id: None,
        }
    }

    /// A fresh empty-file entry.
    pub fn empty_file() -> Self {
        Self {
            kind: EntryType::Empty,
            ..Self::directory()
        }
    }

    /// Bump `date_modified`, never moving it backwards.
    pub fn touch_modified(&mut self) {
        self.date_modified = self.date_modified.max(now_millis());
    }

    /// Bump `date_accessed`, never moving it backwards.
    pub fn touch_accessed(&mut self) {
        self.date_accessed = self.date_accessed.max(now_millis());
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Metadata returned by `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub record_id: Option<String>,
    pub length: u64,
    pub read_only: bool,
    pub kind: EntryType,
    pub date_created: Millis,
    pub date_modified: Millis,
    pub date_accessed: Millis,
}

impl From<&FileTableEntry> for Stat {
    fn from(entry: &FileTableEntry) -> Self {
        Self {
            record_id: entry.record_id.clone(),
            length: entry.length,
            read_only: entry.read_only,
            kind: entry.kind,
            date_created: entry.date_created,
            date_modified: entry.date_modified,
            date_accessed: entry.date_accessed,
        }
    }
}

/// Space accounting for a drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
}

/// Tagged driver variants, for callers that need to branch on backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Table-backed, writable (RAM or local storage).
    Persistent,
    /// Manifest-backed, read-only, content fetched on demand.
    RemoteReadOnly,
}

/// Binary content packaged for external consumption (downloads, exports).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// File name (final path segment).
    pub name: String,
    /// Guessed MIME type.
    pub mime: &'static str,
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        let mime = mime_for_extension(&super::path::extension(&name));
        Self { name, mime, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Best-effort MIME type from a file extension.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "txt" | "log" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Information about a mounted drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub prefix: String,
    pub kind: DriverKind,
    pub remote: bool,
    pub read_only: bool,
}
