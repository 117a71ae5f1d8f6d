//! Drive-letter path parsing and normalization.
//!
//! Full paths look like `c:/docs/a.txt`: a prefix naming the mounted drive,
//! a `:` separator, and an absolute in-drive path. Everything here is pure
//! string manipulation; nothing touches a driver.

use super::error::{FsError, FsResult};

/// Separator between prefix and in-drive path.
pub const PREFIX_SEPARATOR: char = ':';

/// A full path split into its prefix and normalized in-drive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullPath {
    /// Drive prefix, lower-cased (e.g. `c`).
    pub prefix: String,
    /// Absolute in-drive path, always starting with `/` (e.g. `/foo/bar`).
    pub path: String,
}

impl FullPath {
    /// Rebuild the `prefix:/path` form.
    pub fn to_full(&self) -> String {
        join_full(&self.prefix, &self.path)
    }
}

impl std::fmt::Display for FullPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.prefix, PREFIX_SEPARATOR, self.path)
    }
}

/// Split `c:/foo/bar` into `{ prefix: "c", path: "/foo/bar" }`.
///
/// The in-drive part is normalized, so `c:foo/../bar` yields `/bar`.
pub fn deconstruct_full_path(full: &str) -> FsResult<FullPath> {
    let (prefix, rest) = full
        .split_once(PREFIX_SEPARATOR)
        .ok_or_else(|| FsError::invalid_path(format!("missing drive prefix: {full}")))?;

    let prefix = normalize_prefix(prefix)?;
    Ok(FullPath {
        prefix,
        path: normalize(rest),
    })
}

/// Validate and lower-case a drive prefix.
pub fn normalize_prefix(prefix: &str) -> FsResult<String> {
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(FsError::invalid_path(format!("bad drive prefix: {prefix:?}")));
    }
    Ok(prefix.to_ascii_lowercase())
}

/// True if `p` carries a drive prefix.
pub fn has_prefix(p: &str) -> bool {
    match p.split_once(PREFIX_SEPARATOR) {
        Some((prefix, _)) => normalize_prefix(prefix).is_ok(),
        None => false,
    }
}

/// Join a prefix and an in-drive path into the full form.
pub fn join_full(prefix: &str, path: &str) -> String {
    format!("{prefix}{PREFIX_SEPARATOR}{}", normalize(path))
}

/// Normalize an in-drive path.
///
/// Collapses repeated slashes, drops `.`, resolves `..` and clamps at the
/// root. The result always starts with `/` and never ends with one (except
/// the root itself).
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Resolve `rel` against `base`.
///
/// - `rel` with a drive prefix is already absolute and only normalized.
/// - `rel` starting with `/` replaces the in-drive part of `base`.
/// - Otherwise `rel` is appended to `base`.
///
/// Excess `..` clamps at the root. A prefixed `base` keeps its prefix.
pub fn resolve_path(base: &str, rel: &str) -> String {
    if has_prefix(rel) {
        if let Ok(full) = deconstruct_full_path(rel) {
            return full.to_full();
        }
    }

    let (prefix, base_path) = match deconstruct_full_path(base) {
        Ok(full) => (Some(full.prefix), full.path),
        Err(_) => (None, normalize(base)),
    };

    let joined = if rel.starts_with('/') {
        normalize(rel)
    } else {
        normalize(&format!("{base_path}/{rel}"))
    };

    match prefix {
        Some(prefix) => join_full(&prefix, &joined),
        None => joined,
    }
}

/// Parent of a path. The root is its own parent.
///
/// Works on both in-drive (`/a/b`) and full (`c:/a/b`) paths.
pub fn parent_path(p: &str) -> String {
    if let Ok(full) = deconstruct_full_path(p) {
        return join_full(&full.prefix, &parent_path(&full.path));
    }
    let normalized = normalize(p);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Final segment of a path; empty for the root.
pub fn fname(p: &str) -> String {
    let path = match deconstruct_full_path(p) {
        Ok(full) => full.path,
        Err(_) => normalize(p),
    };
    path.rsplit('/').next().unwrap_or_default().to_string()
}

/// Substring after the last `.` of the final segment; empty when there is none.
pub fn extension(p: &str) -> String {
    let name = fname(p);
    match name.rfind('.') {
        Some(idx) => name[idx + 1..].to_string(),
        None => String::new(),
    }
}

/// True if `path` is `ancestor` or lies below it (in-drive paths).
pub fn is_within(path: &str, ancestor: &str) -> bool {
    ancestor == "/" || path == ancestor || path.starts_with(&format!("{ancestor}/"))
}

/// Depth of an in-drive path; the root is 0.
pub(crate) fn depth(path: &str) -> usize {
    if path == "/" {
        0
    } else {
        path.matches('/').count()
    }
}

/// Join an in-drive directory and a child name.
pub(crate) fn child_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Re-root `path` from under `from` to under `to` (in-drive paths).
pub(crate) fn rebase(path: &str, from: &str, to: &str) -> String {
    if path == from {
        return to.to_string();
    }
    let rest = if from == "/" {
        &path[1..]
    } else {
        &path[from.len() + 1..]
    };
    child_path(to, rest)
}
