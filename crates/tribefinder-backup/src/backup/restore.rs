//! Restore live state from an archive

use crate::backup::create::STAGING_PREFIX;
use crate::backup::lock::BackupLock;
use crate::backup::types::{RestoreOutcome, DB_MEMBER, UPLOADS_MEMBER};
use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use crate::fsops::{recover_set_aside, remove_any, safe_swap, StdSwapFs, SwapFs};
use crate::paths::{ResolvedPaths, UPLOADS_REL};
use crate::tools::{tar, ToolRunner};
use crate::util::{contained_join, validate_backup_filename};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Database filenames used by archives written before `db.sqlite` existed
const LEGACY_DB_CANDIDATES: [&str; 5] = [
    "prisma/dev.db",
    "dev.db",
    "prisma/prod.db",
    "prisma/db.sqlite",
    "database.sqlite",
];

/// Uploads locations used by archives written before `uploads/` existed
const LEGACY_UPLOADS_CANDIDATES: [&str; 2] = [UPLOADS_REL, "public/images/uploads"];

/// Journal files `SQLite` keeps next to a database
const SQLITE_SIDE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Entries listed in an integrity error
const MAX_LISTED_ENTRIES: usize = 50;

/// Replace the live database and uploads directory with an archive's contents
///
/// # Errors
/// See [`restore_backup_with`]
pub fn restore_backup(
    config: &BackupConfig,
    tools: &dyn ToolRunner,
    filename: &str,
) -> BackupResult<RestoreOutcome> {
    restore_backup_with(config, tools, &StdSwapFs, filename)
}

/// Restore through an explicit [`SwapFs`]
///
/// Everything up to the swap runs against the extracted copy; the live
/// database and uploads directory are touched only once both members have
/// been located.
///
/// # Errors
/// Returns `Validation` for an unsafe filename (before any filesystem
/// access), `Configuration` for a bad connection string, `NotFound` if the
/// archive is absent, `Locked` if another operation is running, `Integrity`
/// if the archive lacks a database or uploads member, and `Io`/`Tool` errors
/// if extraction or the swap fails
pub fn restore_backup_with(
    config: &BackupConfig,
    tools: &dyn ToolRunner,
    swap: &dyn SwapFs,
    filename: &str,
) -> BackupResult<RestoreOutcome> {
    validate_backup_filename(filename)?;
    let paths = ResolvedPaths::resolve(config)?;
    let archive = contained_join(&paths.backups_dir, filename)?;

    if !archive.is_file() {
        return Err(BackupError::NotFound(format!("backup {filename} does not exist")));
    }

    let _lock = BackupLock::acquire(&config.lock_path())?;

    info!(archive = %filename, "restoring backup");

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir()
        .map_err(BackupError::io(&std::env::temp_dir()))?;

    tar::extract(tools, &archive, staging.path())?;
    reject_symlinks(staging.path())?;

    let extracted_db = locate_database(staging.path(), &paths);
    let extracted_uploads = locate_uploads(staging.path(), &paths);

    let (extracted_db, extracted_uploads) = match (extracted_db, extracted_uploads) {
        (Some(db), Some(uploads)) => (db, uploads),
        (db, uploads) => {
            let mut missing = Vec::new();
            if db.is_none() {
                missing.push(DB_MEMBER.to_string());
            }
            if uploads.is_none() {
                missing.push(format!("{UPLOADS_MEMBER}/"));
            }
            return Err(BackupError::Integrity {
                missing,
                found: list_entries(staging.path()),
            });
        }
    };

    swap_into_place(swap, &paths.database, &extracted_db)?;
    remove_sqlite_side_files(&paths.database);
    swap_into_place(swap, &paths.uploads, &extracted_uploads)?;

    if let Err(e) = staging.close() {
        warn!(error = %e, "could not remove staging directory");
    }

    info!(archive = %filename, "backup restored");
    Ok(RestoreOutcome {
        restored: true,
        message: format!(
            "Restored {filename}. Restart the application so running processes reopen the database."
        ),
    })
}

/// Find the database in an extracted archive
///
/// Tries `db.sqlite`, then the live database's path relative to the project
/// root, then the historical filenames.
fn locate_database(staging: &Path, paths: &ResolvedPaths) -> Option<PathBuf> {
    let mut candidates = vec![staging.join(DB_MEMBER)];
    if let Some(rel) = paths.database_rel() {
        candidates.push(staging.join(rel));
    }
    candidates.extend(LEGACY_DB_CANDIDATES.iter().map(|c| staging.join(c)));

    candidates.into_iter().find(|c| c.is_file())
}

/// Find the uploads tree in an extracted archive, by the same fallback order
fn locate_uploads(staging: &Path, paths: &ResolvedPaths) -> Option<PathBuf> {
    let mut candidates = vec![staging.join(UPLOADS_MEMBER)];
    if let Some(rel) = paths.uploads_rel() {
        candidates.push(staging.join(rel));
    }
    candidates.extend(LEGACY_UPLOADS_CANDIDATES.iter().map(|c| staging.join(c)));

    candidates.into_iter().find(|c| c.is_dir())
}

/// Refuse extracted trees holding symlinks
///
/// Builder archives never contain links; uploads are copied dereferenced.
fn reject_symlinks(staging: &Path) -> BackupResult<()> {
    for entry in WalkDir::new(staging).min_depth(1) {
        let entry = entry.map_err(|e| BackupError::io(staging)(e.into()))?;
        if entry.path_is_symlink() {
            let member = entry
                .path()
                .strip_prefix(staging)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            warn!(member = %member, "archive contains a symbolic link");
            return Err(BackupError::UnsafeMember(member));
        }
    }
    Ok(())
}

fn swap_into_place(swap: &dyn SwapFs, live: &Path, replacement: &Path) -> BackupResult<()> {
    if let Some(recovered) = recover_set_aside(live)? {
        info!(from = %recovered.display(), "recovered interrupted swap before restoring");
    }

    if let Some(parent) = live.parent() {
        fs::create_dir_all(parent).map_err(BackupError::io(parent))?;
    }

    let method = safe_swap(swap, live, replacement)?;
    info!(live = %live.display(), ?method, "swapped in restored copy");
    Ok(())
}

/// Drop journal files that belonged to the replaced database
fn remove_sqlite_side_files(database: &Path) {
    for suffix in SQLITE_SIDE_SUFFIXES {
        let mut name = database.as_os_str().to_os_string();
        name.push(suffix);
        let side = PathBuf::from(name);
        if side.exists() {
            if let Err(e) = remove_any(&side) {
                warn!(path = %side.display(), error = %e, "could not remove stale journal file");
            }
        }
    }
}

/// Relative paths found in the staging directory, for diagnostics
fn list_entries(staging: &Path) -> Vec<String> {
    let mut entries: Vec<String> = WalkDir::new(staging)
        .min_depth(1)
        .max_depth(3)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(staging).ok()?;
            let mut rel = rel.to_string_lossy().into_owned();
            if entry.file_type().is_dir() {
                rel.push('/');
            }
            Some(rel)
        })
        .collect();
    entries.sort();
    entries.truncate(MAX_LISTED_ENTRIES);
    entries
}
