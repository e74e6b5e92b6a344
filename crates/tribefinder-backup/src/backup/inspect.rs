//! Pre-restore inspection of an archive

use crate::backup::create::STAGING_PREFIX;
use crate::backup::types::{
    Inspection, InspectionWarnings, DB_MEMBER, UPLOADS_MEMBER, UPLOADS_PLACEHOLDER,
};
use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use crate::storage::{count_rows, RowCounts};
use crate::tools::{tar, ToolRunner};
use crate::util::contained_join;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Report row counts and upload file counts of an archive without restoring it
///
/// Only `db.sqlite` is extracted; the uploads tree is counted from the member
/// listing. Archives without a database member are reported with
/// `has_db: false` rather than rejected.
///
/// # Errors
/// Returns `Validation` for an unsafe filename (before any filesystem
/// access), `NotFound` if the archive is absent, and `Io`/`Tool` errors if the
/// archive cannot be listed
pub fn inspect_backup(
    config: &BackupConfig,
    tools: &dyn ToolRunner,
    filename: &str,
) -> BackupResult<Inspection> {
    let archive = contained_join(&config.backups_dir, filename)?;

    if !archive.is_file() {
        return Err(BackupError::NotFound(format!("backup {filename} does not exist")));
    }

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir()
        .map_err(BackupError::io(&std::env::temp_dir()))?;

    let extracted_db = staging.path().join(DB_MEMBER);
    let has_db = match tar::extract_member(tools, &archive, staging.path(), DB_MEMBER) {
        Ok(()) => is_regular_file(&extracted_db),
        Err(e) => {
            warn!(archive = %filename, error = %e, "archive has no readable db.sqlite");
            false
        }
    };

    let members = tar::list(tools, &archive)?;
    let uploads_file_count = count_upload_files(&members);

    let RowCounts {
        counts,
        uncountable,
    } = if has_db {
        count_rows(&extracted_db)
    } else {
        RowCounts::default()
    };

    let count = |table: &str| counts.get(table).copied().unwrap_or(0);
    let warnings = InspectionWarnings {
        has_very_few_data: count("Group") == 0
            && count("Event") == 0
            && count("GalleryImage") == 0
            && uploads_file_count == 0,
    };

    if let Err(e) = staging.close() {
        warn!(error = %e, "could not remove staging directory");
    }

    info!(
        archive = %filename,
        has_db,
        uploads_file_count,
        has_very_few_data = warnings.has_very_few_data,
        "inspected backup"
    );

    Ok(Inspection {
        filename: filename.to_string(),
        has_db,
        uploads_file_count,
        counts,
        uncountable,
        warnings,
    })
}

/// Whether `path` is a plain file and not a link to one
fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_file())
}

/// Count regular files under `uploads/` in a tar member listing
///
/// Directory entries (trailing `/`) and placeholder files are skipped.
#[must_use]
pub fn count_upload_files(members: &[String]) -> usize {
    let prefix = format!("{UPLOADS_MEMBER}/");
    members
        .iter()
        .map(|m| m.strip_prefix("./").unwrap_or(m))
        .filter(|m| m.starts_with(&prefix) && !m.ends_with('/'))
        .filter(|m| m.rsplit('/').next() != Some(UPLOADS_PLACEHOLDER))
        .count()
}
