//! Error types for backup operations

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Errors that can occur while building, inspecting, restoring or sweeping backups
#[derive(Debug, Error)]
pub enum BackupError {
    /// Required environment value absent or malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Expected file (database, archive) absent on disk
    #[error("Not found: {0}")]
    NotFound(String),

    /// Untrusted filename failed the safety predicate
    #[error("Invalid backup filename: {0}")]
    Validation(String),

    /// Archive extracted but lacks the members needed for a restore
    #[error("Archive is missing {}; extracted contents: [{}]", .missing.join(", "), .found.join(", "))]
    Integrity {
        missing: Vec<String>,
        found: Vec<String>,
    },

    /// Archive member is a symbolic link, which restores never place in live state
    #[error("Archive member {0} is a symbolic link")]
    UnsafeMember(String),

    /// Filesystem operation failed
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External tool exited unsuccessfully
    #[error("{program} exited with {}: {stderr}", .status.map_or_else(|| "signal".to_string(), |c| format!("status {c}")))]
    Tool {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    /// External tool ran past its deadline and was killed
    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    /// Another build/restore holds the advisory lock
    #[error("Another backup operation is in progress (lock held at {})", .0.display())]
    Locked(PathBuf),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackupError {
    /// Get the error code for CLI/API responses
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Integrity { .. } | Self::UnsafeMember(_) => "INTEGRITY_ERROR",
            Self::Io { .. } | Self::Tool { .. } | Self::Timeout { .. } => "IO_ERROR",
            Self::Locked(_) => "LOCKED",
            Self::Sqlite(_) => "DATABASE_ERROR",
            Self::Json(_) => "PARSE_ERROR",
        }
    }

    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
