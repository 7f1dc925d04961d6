//! Content hashing of script directories.
//!
//! A build key identifies a compiled module by the bytes that went into it:
//! the scope's own sources and project descriptor (top level only) plus every
//! source file of the shared library tree. File paths are sorted before
//! hashing so enumeration order never changes the key.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::layout::ScriptLayout;

/// A 256-bit content hash (blake3 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Sentinel for "no content" (all zeros).
    #[inline]
    pub const fn empty() -> Self {
        Self([0; 32])
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 32]
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identity of a compiled module: scope name plus content hash
///
/// Rendered as `{scope}-{hash}`, which is also the artifact file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildKey {
    pub scope: String,
    pub hash: ContentHash,
}

impl BuildKey {
    pub fn new(scope: impl Into<String>, hash: ContentHash) -> Self {
        Self {
            scope: scope.into(),
            hash,
        }
    }

    /// Whether the key was computed from a missing source directory
    pub fn is_empty(&self) -> bool {
        self.hash.is_empty()
    }
}

impl std::fmt::Display for BuildKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.scope, self.hash)
    }
}

/// Compute the build key of `scope` from its directory and the shared library
pub fn compute_build_key(layout: &ScriptLayout, scope: &str) -> BuildKey {
    let hash = hash_sources(
        layout,
        &layout.scope_dir(scope),
        &layout.common_lib_dir(),
    );
    debug!(target: "quest::reload", "Build key for {}: {}", scope, hash);
    BuildKey::new(scope, hash)
}

/// Hash the recognized files of `primary` (top level) and `shared` (recursive)
///
/// Returns [`ContentHash::empty`] when `primary` does not exist.
pub fn hash_sources(layout: &ScriptLayout, primary: &Path, shared: &Path) -> ContentHash {
    if !primary.is_dir() {
        warn!(
            target: "quest::reload",
            "Script directory not found: {}",
            primary.display()
        );
        return ContentHash::empty();
    }

    let mut hasher = blake3::Hasher::new();

    for (relative, path) in primary_files(layout, primary) {
        hash_file(&mut hasher, b"scope", &relative, &path);
    }
    for (relative, path) in shared_files(layout, shared) {
        hash_file(&mut hasher, b"shared", &relative, &path);
    }

    ContentHash::new(*hasher.finalize().as_bytes())
}

/// Sorted top-level sources and descriptors of a scope directory
pub(crate) fn primary_files(layout: &ScriptLayout, dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| layout.is_source_file(path) || layout.is_descriptor(path))
        .filter_map(|path| relative_name(dir, &path).map(|rel| (rel, path)))
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

/// Sorted sources of the shared library tree (recursive)
pub(crate) fn shared_files(layout: &ScriptLayout, dir: &Path) -> Vec<(String, PathBuf)> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| layout.is_source_file(path))
        .filter_map(|path| relative_name(dir, &path).map(|rel| (rel, path)))
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

/// Relative path with `/` separators, so keys match across platforms
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Some(parts.join("/"))
}

fn hash_file(hasher: &mut blake3::Hasher, section: &[u8], relative: &str, path: &Path) {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(
                target: "quest::reload",
                "Skipping unreadable source {}: {}",
                path.display(),
                e
            );
            return;
        }
    };

    hasher.update(section);
    hasher.update(&[0]);
    hasher.update(relative.as_bytes());
    hasher.update(&[0]);
    hasher.update(&(contents.len() as u64).to_le_bytes());
    hasher.update(&contents);
}
