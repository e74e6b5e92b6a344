//! Locating the project root, the live database file and the uploads directory

use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File every project root contains
pub const PROJECT_MANIFEST: &str = "package.json";
/// ORM schema; its presence marks the application root
pub const SCHEMA_FILE: &str = "prisma/schema.prisma";
/// Explicit marker for deployments without the schema file
pub const BACKUP_MARKER: &str = ".tribefinder-backup";
/// Uploads directory relative to the project root
pub const UPLOADS_REL: &str = "public/uploads";
/// Parent directories visited before giving up on root discovery
pub const MAX_ROOT_HOPS: usize = 10;

/// Live state locations for one operation
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    /// Project root
    pub project_root: PathBuf,
    /// Live database file
    pub database: PathBuf,
    /// Uploads directory as configured (may be a symlink)
    pub uploads_configured: PathBuf,
    /// Uploads directory with symlinks resolved
    pub uploads: PathBuf,
    /// Archive directory
    pub backups_dir: PathBuf,
}

impl ResolvedPaths {
    /// Resolve every path an operation needs
    ///
    /// # Errors
    /// Returns `BackupError::Configuration` if the connection string is absent
    /// or not a `file:` URL
    pub fn resolve(config: &BackupConfig) -> BackupResult<Self> {
        let database = database_path_from_url(config.database_url()?, &config.project_root)?;
        let uploads_configured = config.project_root.join(&config.uploads_rel);
        let uploads = resolve_symlinks(&uploads_configured);

        Ok(Self {
            project_root: config.project_root.clone(),
            database,
            uploads_configured,
            uploads,
            backups_dir: config.backups_dir.clone(),
        })
    }

    /// Database path relative to the project root, when it lies inside it
    #[must_use]
    pub fn database_rel(&self) -> Option<&Path> {
        self.database.strip_prefix(&self.project_root).ok()
    }

    /// Uploads path relative to the project root, when it lies inside it
    #[must_use]
    pub fn uploads_rel(&self) -> Option<&Path> {
        self.uploads_configured
            .strip_prefix(&self.project_root)
            .ok()
    }
}

/// Walk upward from `start` looking for the application root
///
/// A directory qualifies when it holds the project manifest together with the
/// schema file or the backup marker. Falls back to `start` after
/// [`MAX_ROOT_HOPS`] parents.
#[must_use]
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut current = Some(start);

    for _ in 0..=MAX_ROOT_HOPS {
        let Some(dir) = current else { break };

        if is_project_root(dir) {
            debug!(root = %dir.display(), "found project root");
            return dir.to_path_buf();
        }
        current = dir.parent();
    }

    start.to_path_buf()
}

fn is_project_root(dir: &Path) -> bool {
    dir.join(PROJECT_MANIFEST).is_file()
        && (dir.join(SCHEMA_FILE).is_file() || dir.join(BACKUP_MARKER).exists())
}

/// Resolve the database file named by a `file:` connection string
///
/// The scheme and any leading `//` are stripped, as is a `?` parameter
/// suffix. Relative paths are joined to `project_root`.
///
/// # Errors
/// Returns `BackupError::Configuration` for other schemes or an empty path
pub fn database_path_from_url(url: &str, project_root: &Path) -> BackupResult<PathBuf> {
    let rest = url.trim().strip_prefix("file:").ok_or_else(|| {
        BackupError::Configuration(format!(
            "only file: database URLs can be backed up, got {url:?}"
        ))
    })?;

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let rest = rest.split_once('?').map_or(rest, |(path, _)| path);

    if rest.is_empty() {
        return Err(BackupError::Configuration(format!(
            "database URL has no path: {url:?}"
        )));
    }

    let path = Path::new(rest);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(project_root.join(path))
    }
}

/// Resolve symlinks to the real target, keeping `path` if that fails
#[must_use]
pub fn resolve_symlinks(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
