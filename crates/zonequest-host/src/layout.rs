//! Filesystem layout of scripts, artifacts and lock files.

use std::path::{Path, PathBuf};
use tracing::warn;

use crate::hasher::BuildKey;

pub const GLOBAL_SCOPE: &str = "global";
pub const COMMON_SCOPE: &str = "common";

/// Paths derived from the configured work directory
///
/// ```text
/// scripts/{scope}/            sources + {scope}.{descriptor}
/// scripts/global/
/// scripts/common/lib/         shared sources (recursive)
/// out/{scope}-{hash}.{ext}    artifacts
/// out/{lock}.lock             lock files
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLayout {
    pub script_root: PathBuf,
    pub output_dir: PathBuf,
    pub artifact_extension: String,
    pub source_extensions: Vec<String>,
    pub descriptor_extension: String,
}

impl ScriptLayout {
    pub fn scope_dir(&self, scope: &str) -> PathBuf {
        self.script_root.join(scope)
    }

    pub fn common_dir(&self) -> PathBuf {
        self.script_root.join(COMMON_SCOPE)
    }

    pub fn common_lib_dir(&self) -> PathBuf {
        self.common_dir().join("lib")
    }

    pub fn descriptor_path(&self, scope: &str) -> PathBuf {
        self.scope_dir(scope)
            .join(format!("{}.{}", scope, self.descriptor_extension))
    }

    pub fn artifact_path(&self, key: &BuildKey) -> PathBuf {
        self.module_path(&key.to_string())
    }

    /// Path of a module artifact by its stem (`common`, `zone-abc123`, ...)
    pub fn module_path(&self, stem: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", stem, self.artifact_extension))
    }

    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.lock", name))
    }

    pub fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.source_extensions.iter().any(|s| s == ext))
    }

    pub fn is_descriptor(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == self.descriptor_extension)
    }

    /// Artifacts of earlier builds of `scope` (`{scope}-{hex}.*`)
    pub fn stale_artifacts(&self, scope: &str) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.output_dir) else {
            return Vec::new();
        };

        let prefix = format!("{}-", scope);
        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .and_then(|name| name.strip_prefix(&prefix))
                    .and_then(|rest| rest.split('.').next())
                    .is_some_and(|hash| {
                        !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit())
                    })
            })
            .collect()
    }

    /// Delete every stale artifact of `scope`, returning how many were removed
    pub fn remove_stale_artifacts(&self, scope: &str) -> usize {
        let mut removed = 0;
        for path in self.stale_artifacts(scope) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(
                    target: "quest::reload",
                    "Failed to delete stale artifact {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        removed
    }
}
