//! Backup configuration loaded from the process environment

use crate::error::{BackupError, BackupResult};
use crate::paths::{find_project_root, UPLOADS_REL};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection string of the live database (`file:` URL)
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Overrides project root discovery
pub const ENV_PROJECT_ROOT: &str = "TRIBEFINDER_ROOT";
/// Directory archives are written to
pub const ENV_BACKUP_DIR: &str = "BACKUP_DIR";
/// Number of archives kept by the retention sweep
pub const ENV_RETENTION: &str = "BACKUP_RETENTION";
/// Deadline for each tar invocation, in seconds
pub const ENV_TOOL_TIMEOUT: &str = "BACKUP_TOOL_TIMEOUT_SECS";

pub const DEFAULT_BACKUPS_DIR: &str = "backups";
pub const DEFAULT_RETENTION: usize = 30;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(600);

/// Where live state and archives live, plus operational limits
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Project root, as discovered from the working directory
    pub project_root: PathBuf,
    /// `file:` connection string of the live database
    pub database_url: Option<String>,
    /// Directory holding the archives
    pub backups_dir: PathBuf,
    /// Uploads directory, relative to the project root
    pub uploads_rel: PathBuf,
    /// Archives kept by the retention sweep
    pub retention: usize,
    /// Deadline for each external tool invocation
    pub tool_timeout: Duration,
}

impl BackupConfig {
    /// Create a configuration rooted at `project_root` with default settings
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            backups_dir: project_root.join(DEFAULT_BACKUPS_DIR),
            project_root,
            database_url: None,
            uploads_rel: PathBuf::from(UPLOADS_REL),
            retention: DEFAULT_RETENTION,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Set the database connection string
    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Set the backups directory; relative paths are taken from the project root
    #[must_use]
    pub fn with_backups_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.backups_dir = self.project_root.join(dir);
        self
    }

    /// Set the retention limit
    #[must_use]
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Set the external tool deadline
    #[must_use]
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Load configuration from the process environment and working directory
    ///
    /// # Errors
    /// Returns `BackupError::Configuration` if a numeric variable is malformed
    /// or the working directory cannot be read
    pub fn from_env() -> BackupResult<Self> {
        let cwd = std::env::current_dir().map_err(|e| {
            BackupError::Configuration(format!("cannot read working directory: {e}"))
        })?;
        Self::from_lookup(&cwd, |key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    /// Returns `BackupError::Configuration` if a numeric variable is malformed
    pub fn from_lookup<F>(cwd: &Path, lookup: F) -> BackupResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_root = match non_empty(lookup(ENV_PROJECT_ROOT)) {
            Some(root) => cwd.join(root),
            None => find_project_root(cwd),
        };

        let mut config = Self::new(project_root);

        if let Some(url) = non_empty(lookup(ENV_DATABASE_URL)) {
            config.database_url = Some(url);
        }
        if let Some(dir) = non_empty(lookup(ENV_BACKUP_DIR)) {
            config = config.with_backups_dir(dir);
        }
        if let Some(raw) = non_empty(lookup(ENV_RETENTION)) {
            config.retention = parse_number(ENV_RETENTION, &raw)?;
        }
        if let Some(raw) = non_empty(lookup(ENV_TOOL_TIMEOUT)) {
            config.tool_timeout = Duration::from_secs(parse_number(ENV_TOOL_TIMEOUT, &raw)?);
        }

        Ok(config)
    }

    /// The database connection string, required by build and restore
    ///
    /// # Errors
    /// Returns `BackupError::Configuration` if no connection string is set
    pub fn database_url(&self) -> BackupResult<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            BackupError::Configuration(format!("{ENV_DATABASE_URL} is not set"))
        })
    }

    /// Path of the advisory lock file guarding mutating operations
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.backups_dir.join(".backup.lock")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> BackupResult<T> {
    raw.parse().map_err(|_| {
        BackupError::Configuration(format!(
            "{key} must be a non-negative integer, got {raw:?}"
        ))
    })
}
