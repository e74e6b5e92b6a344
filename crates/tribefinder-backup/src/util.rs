//! Filename admission control and path containment for backup archives

use crate::error::{BackupError, BackupResult};
use std::path::{Component, Path, PathBuf};

/// Prefix of archives produced by the builder
pub const BACKUP_PREFIX: &str = "tribefinder-backup-";

/// Prefix of archives uploaded by an administrator
pub const UPLOAD_PREFIX: &str = "upload-";

/// Extension shared by every archive
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

const KNOWN_PREFIXES: [&str; 2] = [BACKUP_PREFIX, UPLOAD_PREFIX];

/// Check whether an untrusted archive filename may be used in filesystem calls
#[must_use]
pub fn is_safe_backup_filename(name: &str) -> bool {
    validate_backup_filename(name).is_ok()
}

/// Validate an untrusted archive filename
///
/// A name is accepted only if it carries the archive extension, one of the
/// known prefixes, and no separator, parent reference or NUL byte. Nothing
/// touches the filesystem here.
///
/// # Errors
/// Returns `BackupError::Validation` naming the first rule the name breaks
pub fn validate_backup_filename(name: &str) -> BackupResult<()> {
    if name.contains('/') || name.contains('\\') {
        return Err(BackupError::Validation(format!(
            "contains a path separator: {name}"
        )));
    }

    if name.contains("..") {
        return Err(BackupError::Validation(format!(
            "contains a parent directory reference: {name}"
        )));
    }

    if name.contains('\0') {
        return Err(BackupError::Validation(
            "contains a null byte".to_string(),
        ));
    }

    if !name.ends_with(ARCHIVE_EXTENSION) {
        return Err(BackupError::Validation(format!(
            "must end with {ARCHIVE_EXTENSION}: {name}"
        )));
    }

    if !KNOWN_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
        return Err(BackupError::Validation(format!(
            "unknown archive prefix: {name}"
        )));
    }

    Ok(())
}

/// Join a validated filename to the backups directory and prove the result
/// stays strictly inside it
///
/// # Errors
/// Returns `BackupError::Validation` if the name fails the predicate or the
/// joined path escapes `base`
pub fn contained_join(base: &Path, filename: &str) -> BackupResult<PathBuf> {
    validate_backup_filename(filename)?;

    let base = absolute_normalized(base);
    let candidate = normalize(&base.join(filename));

    verify_under_base(&base, &candidate)?;
    Ok(candidate)
}

/// Make a path absolute against the working directory and fold `.`/`..`
#[must_use]
pub fn absolute_normalized(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_default();
        normalize(&cwd.join(path))
    }
}

/// Lexically fold `.` and `..` components without consulting the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}

/// Require `path` to be a strict descendant of `base`
///
/// If both exist, their canonical forms are compared as well, so a symlinked
/// entry cannot point outside the backups directory.
fn verify_under_base(base: &Path, path: &Path) -> BackupResult<()> {
    if path == base || !path.starts_with(base) {
        return Err(BackupError::Validation(format!(
            "resolves outside the backups directory: {}",
            path.display()
        )));
    }

    if let (Ok(canonical_base), Ok(canonical_path)) = (base.canonicalize(), path.canonicalize()) {
        if canonical_path == canonical_base || !canonical_path.starts_with(&canonical_base) {
            return Err(BackupError::Validation(format!(
                "resolves outside the backups directory: {}",
                path.display()
            )));
        }
    }

    Ok(())
}
