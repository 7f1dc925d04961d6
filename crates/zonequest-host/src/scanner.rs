//! Source change detection for hot reloading
//!
//! Tracks the newest modification time across a scope's sources and the
//! shared library tree. Only an increase counts as a change; the value seen
//! at construction is the baseline.

use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

use crate::hasher::{primary_files, shared_files};
use crate::layout::ScriptLayout;

/// Poll-based watcher for one scope
#[derive(Debug)]
pub struct ChangeWatcher {
    layout: ScriptLayout,
    scope: String,
    last_seen: Option<SystemTime>,
}

impl ChangeWatcher {
    pub fn new(layout: ScriptLayout, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        let last_seen = latest_modification(&layout, &scope);
        Self {
            layout,
            scope,
            last_seen,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns true if any watched file is newer than at the previous poll
    pub fn poll(&mut self) -> bool {
        let current = latest_modification(&self.layout, &self.scope);
        let changed = match (self.last_seen, current) {
            (Some(previous), Some(now)) => now > previous,
            (None, Some(_)) => true,
            _ => false,
        };

        if changed {
            debug!(
                target: "quest::reload",
                "Sources of {} changed (newest: {:?})",
                self.scope,
                current
            );
            self.last_seen = current;
        }
        changed
    }
}

/// Newest modification time over the files that feed the scope's build key
pub fn latest_modification(layout: &ScriptLayout, scope: &str) -> Option<SystemTime> {
    let primary = primary_files(layout, &layout.scope_dir(scope));
    let shared = shared_files(layout, &layout.common_lib_dir());

    primary
        .iter()
        .chain(shared.iter())
        .filter_map(|(_, path)| modified(path))
        .max()
}

fn modified(path: &Path) -> Option<SystemTime> {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(time) => Some(time),
        Err(e) => {
            tracing::warn!(
                target: "quest::reload",
                "Failed to get modification time for {}: {}",
                path.display(),
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn layout(root: &Path) -> ScriptLayout {
        ScriptLayout {
            script_root: root.join("scripts"),
            output_dir: root.join("out"),
            artifact_extension: "wasm".to_string(),
            source_extensions: vec!["wat".to_string()],
            descriptor_extension: "toml".to_string(),
        }
    }

    fn touch(path: &PathBuf, offset_secs: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        if !path.exists() {
            fs::write(path, b"(module)").unwrap();
        }
        let time = SystemTime::now() + Duration::from_secs(offset_secs);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_unchanged_sources_report_no_change() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("scripts/qeynos/guard.wat"), 0);

        let mut watcher = ChangeWatcher::new(layout(dir.path()), "qeynos");
        assert!(!watcher.poll());
        assert!(!watcher.poll());
    }

    #[test]
    fn test_newer_source_reports_change_once() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("scripts/qeynos/guard.wat");
        touch(&file, 0);

        let mut watcher = ChangeWatcher::new(layout(dir.path()), "qeynos");
        touch(&file, 10);
        assert!(watcher.poll());
        assert!(!watcher.poll());
    }

    #[test]
    fn test_shared_library_change_is_detected() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("scripts/qeynos/guard.wat"), 0);
        let mut watcher = ChangeWatcher::new(layout(dir.path()), "qeynos");

        touch(&dir.path().join("scripts/common/lib/util/text.wat"), 10);
        assert!(watcher.poll());
    }

    #[test]
    fn test_older_timestamp_is_not_a_change() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("scripts/qeynos/guard.wat");
        touch(&file, 100);
        let mut watcher = ChangeWatcher::new(layout(dir.path()), "qeynos");

        touch(&file, 0);
        assert!(!watcher.poll());
    }

    #[test]
    fn test_directory_appearing_is_a_change() {
        let dir = TempDir::new().unwrap();
        let mut watcher = ChangeWatcher::new(layout(dir.path()), "qeynos");
        assert!(!watcher.poll());

        touch(&dir.path().join("scripts/qeynos/guard.wat"), 0);
        assert!(watcher.poll());
    }
}
