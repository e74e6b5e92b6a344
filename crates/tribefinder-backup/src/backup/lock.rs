//! Advisory lock serializing operations that write archives or live state

use crate::error::{BackupError, BackupResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock held for the duration of a build, restore, delete or import
///
/// The lock file itself is left in place; deleting it on release would let a
/// waiter lock an unlinked inode.
pub struct BackupLock {
    file: File,
    path: PathBuf,
}

impl BackupLock {
    /// Take the lock without blocking
    ///
    /// # Errors
    /// Returns `BackupError::Locked` if another process holds it, or
    /// `BackupError::Io` if the lock file cannot be opened
    pub fn acquire(path: &Path) -> BackupResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(BackupError::io(parent))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(BackupError::io(path))?;

        file.try_lock_exclusive()
            .map_err(|_| BackupError::Locked(path.to_path_buf()))?;

        debug!(path = %path.display(), "acquired backup lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for BackupLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "released backup lock");
    }
}
