//! Named, file-based lock shared by every host process on the machine.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive advisory lock on `{dir}/{name}.lock`
///
/// Acquisition is always non-blocking. The lock file is deleted on release.
#[derive(Debug)]
pub struct BuildLock {
    path: PathBuf,
    file: Option<File>,
}

impl BuildLock {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{}.lock", name)),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Try once to take the lock; `Ok(false)` when another holder has it
    pub fn try_acquire(&mut self) -> io::Result<bool> {
        if self.file.is_some() {
            return Ok(true);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Ok(false),
            Err(TryLockError::Error(e)) => return Err(e),
        }

        // The previous holder may have unlinked the file between our open and lock
        if !same_file(&file, &self.path) {
            debug!(
                target: "quest::reload",
                "Lock file {} was replaced while acquiring",
                self.path.display()
            );
            return Ok(false);
        }

        debug!(target: "quest::reload", "Acquired {}", self.path.display());
        self.file = Some(file);
        Ok(true)
    }

    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        // Unlink while still locked so a waiter never locks a dead inode unnoticed
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(
                target: "quest::reload",
                "Failed to delete lock file {}: {}",
                self.path.display(),
                e
            );
        }
        drop(file);
        debug!(target: "quest::reload", "Released {}", self.path.display());
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}
