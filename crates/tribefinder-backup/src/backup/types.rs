//! Archive layout and operation results

use crate::util::{ARCHIVE_EXTENSION, BACKUP_PREFIX, UPLOAD_PREFIX};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Database snapshot member
pub const DB_MEMBER: &str = "db.sqlite";
/// Uploads tree member
pub const UPLOADS_MEMBER: &str = "uploads";
/// Settings snapshot member
pub const SETTINGS_MEMBER: &str = "settings.json";
/// Placeholder kept in otherwise empty upload folders
pub const UPLOADS_PLACEHOLDER: &str = ".gitkeep";

/// Name of a builder archive created at `at`
///
/// The ISO-8601 instant has `:` and `.` replaced with `-`.
#[must_use]
pub fn archive_filename(at: DateTime<Utc>) -> String {
    format!("{BACKUP_PREFIX}{}{ARCHIVE_EXTENSION}", filesystem_timestamp(at))
}

/// Name of an administrator upload received at `at`
#[must_use]
pub fn upload_filename(at: DateTime<Utc>) -> String {
    format!("{UPLOAD_PREFIX}{}{ARCHIVE_EXTENSION}", filesystem_timestamp(at))
}

fn filesystem_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// An archive on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub filename: String,
    pub size_bytes: u64,
    /// Modification time in epoch milliseconds
    pub created_at_ms: i64,
}

/// Heuristic flags raised by inspection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionWarnings {
    /// No groups, events, gallery images or upload files at all
    pub has_very_few_data: bool,
}

/// Pre-restore report on an archive's contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub filename: String,
    pub has_db: bool,
    pub uploads_file_count: usize,
    /// Row counts keyed by model name
    pub counts: BTreeMap<String, u64>,
    /// Tables whose count query failed (reported as 0 in `counts`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncountable: Vec<String>,
    pub warnings: InspectionWarnings,
}

impl Inspection {
    /// Count for `table`, zero when unknown
    #[must_use]
    pub fn count(&self, table: &str) -> u64 {
        self.counts.get(table).copied().unwrap_or(0)
    }
}

/// Result of a completed restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub restored: bool,
    pub message: String,
}
