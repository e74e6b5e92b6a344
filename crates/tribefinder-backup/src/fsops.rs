//! Tree copy and crash-safe replacement of live files and directories

use crate::error::{BackupError, BackupResult};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Infix of set-aside copies kept while a swap is in flight
pub const SET_ASIDE_INFIX: &str = ".pre-restore-";

/// Options for [`copy_tree`]
#[derive(Debug, Clone, Copy)]
pub struct CopyOptions {
    /// Copy what symlinks point at instead of the links themselves
    pub dereference_symlinks: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            dereference_symlinks: true,
        }
    }
}

/// Copy a file or directory tree from `src` to `dst`
///
/// # Errors
/// Returns an error if any entry cannot be read or written, including broken
/// or looping symlinks when dereferencing
pub fn copy_tree(src: &Path, dst: &Path, options: CopyOptions) -> io::Result<()> {
    let meta = if options.dereference_symlinks {
        fs::metadata(src)?
    } else {
        fs::symlink_metadata(src)?
    };

    if !meta.is_dir() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        return copy_entry(src, dst, meta.file_type().is_symlink());
    }

    for entry in WalkDir::new(src).follow_links(options.dereference_symlinks) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            copy_entry(entry.path(), &target, file_type.is_symlink())?;
        }
    }

    Ok(())
}

fn copy_entry(src: &Path, dst: &Path, is_symlink: bool) -> io::Result<()> {
    if is_symlink {
        copy_symlink(src, dst)
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

/// Remove a file, symlink or directory tree
///
/// # Errors
/// Returns an error if the path cannot be removed
pub fn remove_any(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Whether anything (even a dangling symlink) exists at `path`
#[must_use]
pub fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Filesystem primitives used by [`safe_swap`], faked in tests to inject
/// failures between steps
pub trait SwapFs {
    /// Atomically rename `from` to `to`
    ///
    /// # Errors
    /// Returns an error if the rename fails (for example across devices)
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copy a file or tree, dereferencing symlinks
    ///
    /// # Errors
    /// Returns an error if the copy fails
    fn copy_all(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file or tree
    ///
    /// # Errors
    /// Returns an error if the removal fails
    fn remove_all(&self, path: &Path) -> io::Result<()>;
}

/// [`SwapFs`] over `std::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct StdSwapFs;

impl SwapFs for StdSwapFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy_all(&self, from: &Path, to: &Path) -> io::Result<()> {
        copy_tree(from, to, CopyOptions::default())
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        remove_any(path)
    }
}

/// How the replacement reached its place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapMethod {
    Renamed,
    Copied,
}

/// Replace `live` with `replacement`
///
/// The live entry is renamed aside first, the replacement is renamed (or,
/// across devices, copied) into place, and only then is the set-aside copy
/// deleted. At every point either the original or the replacement occupies
/// `live`, or the original sits at its set-aside path where
/// [`recover_set_aside`] finds it. A failed copy is undone and the original
/// renamed back before the error is returned.
///
/// # Errors
/// Returns `BackupError::Io` if the replacement cannot be put in place
pub fn safe_swap(ops: &dyn SwapFs, live: &Path, replacement: &Path) -> BackupResult<SwapMethod> {
    let aside = if entry_exists(live) {
        let aside = set_aside_path(live);
        ops.rename(live, &aside).map_err(BackupError::io(live))?;
        Some(aside)
    } else {
        None
    };

    let method = match ops.rename(replacement, live) {
        Ok(()) => SwapMethod::Renamed,
        Err(e) => {
            warn!(live = %live.display(), error = %e, "rename into place failed, copying instead");
            if let Err(copy_err) = ops.copy_all(replacement, live) {
                roll_back(ops, live, aside.as_deref());
                return Err(BackupError::Io {
                    path: live.to_path_buf(),
                    source: copy_err,
                });
            }
            SwapMethod::Copied
        }
    };

    if let Some(aside) = aside {
        if let Err(e) = ops.remove_all(&aside) {
            warn!(path = %aside.display(), error = %e, "could not delete set-aside copy");
        }
    }

    Ok(method)
}

fn roll_back(ops: &dyn SwapFs, live: &Path, aside: Option<&Path>) {
    if entry_exists(live) {
        if let Err(e) = ops.remove_all(live) {
            error!(path = %live.display(), error = %e, "could not remove partial copy");
            return;
        }
    }

    if let Some(aside) = aside {
        if let Err(e) = ops.rename(aside, live) {
            error!(
                original = %aside.display(),
                live = %live.display(),
                error = %e,
                "could not move original back; it remains at the set-aside path"
            );
        }
    }
}

/// Unique sibling path used to hold `live` during a swap
#[must_use]
pub fn set_aside_path(live: &Path) -> PathBuf {
    let mut name: OsString = live.file_name().unwrap_or_default().to_os_string();
    name.push(SET_ASIDE_INFIX);
    name.push(Uuid::new_v4().simple().to_string());
    live.with_file_name(name)
}

/// Repair the aftermath of a swap interrupted by a crash
///
/// When `live` is missing, the newest set-aside copy is renamed back and its
/// path returned. When `live` exists, leftover set-aside copies are stale and
/// are deleted.
///
/// # Errors
/// Returns `BackupError::Io` if the parent directory cannot be read or the
/// original cannot be moved back
pub fn recover_set_aside(live: &Path) -> BackupResult<Option<PathBuf>> {
    let (Some(parent), Some(name)) = (live.parent(), live.file_name()) else {
        return Ok(None);
    };
    if !parent.is_dir() {
        return Ok(None);
    }

    let mut prefix = name.to_os_string();
    prefix.push(SET_ASIDE_INFIX);
    let prefix = prefix.to_string_lossy().into_owned();

    let mut leftovers = Vec::new();
    for entry in fs::read_dir(parent).map_err(BackupError::io(parent))? {
        let entry = entry.map_err(BackupError::io(parent))?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok();
            leftovers.push((entry.path(), modified));
        }
    }

    if leftovers.is_empty() {
        return Ok(None);
    }

    if entry_exists(live) {
        for (path, _) in leftovers {
            info!(path = %path.display(), "removing stale set-aside copy");
            if let Err(e) = remove_any(&path) {
                warn!(path = %path.display(), error = %e, "could not remove stale set-aside copy");
            }
        }
        return Ok(None);
    }

    leftovers.sort_by_key(|(_, modified)| std::cmp::Reverse(*modified));
    let (newest, _) = leftovers.swap_remove(0);
    warn!(
        from = %newest.display(),
        to = %live.display(),
        "live entry missing after interrupted swap, restoring set-aside copy"
    );
    fs::rename(&newest, live).map_err(BackupError::io(live))?;
    Ok(Some(newest))
}
