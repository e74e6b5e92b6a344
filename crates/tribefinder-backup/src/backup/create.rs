//! Archive creation: stage a snapshot of live state and pack it

use crate::backup::lock::BackupLock;
use crate::backup::types::{
    archive_filename, BackupInfo, DB_MEMBER, SETTINGS_MEMBER, UPLOADS_MEMBER,
};
use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use crate::fsops::{copy_tree, CopyOptions};
use crate::paths::ResolvedPaths;
use crate::settings::SettingsStore;
use crate::tools::{tar, ToolRunner};
use crate::util::absolute_normalized;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{info, warn};

/// Prefix of staging directories created under the system temp dir
pub(crate) const STAGING_PREFIX: &str = "tribefinder-stage-";

/// Create a new archive of the live database, uploads and settings
///
/// Archive names have millisecond granularity. Overlapping builds fail with
/// `Locked`; two sequential builds inside one millisecond would share a name
/// and the later archive replaces the earlier one.
///
/// # Errors
/// Returns `Configuration` for a missing or non-`file:` connection string,
/// `NotFound` if the database file is absent, `Locked` if another operation
/// is running, and `Io`/`Tool` errors if staging or packing fails
pub fn create_backup(
    config: &BackupConfig,
    tools: &dyn ToolRunner,
    settings: &dyn SettingsStore,
) -> BackupResult<BackupInfo> {
    create_backup_at(config, tools, settings, Utc::now())
}

/// [`create_backup`] with an explicit timestamp for the archive name
///
/// # Errors
/// See [`create_backup`]
pub fn create_backup_at(
    config: &BackupConfig,
    tools: &dyn ToolRunner,
    settings: &dyn SettingsStore,
    at: DateTime<Utc>,
) -> BackupResult<BackupInfo> {
    let paths = ResolvedPaths::resolve(config)?;

    fs::create_dir_all(&paths.backups_dir).map_err(BackupError::io(&paths.backups_dir))?;

    let filename = archive_filename(at);
    let archive_path = absolute_normalized(&paths.backups_dir).join(&filename);

    if !paths.database.is_file() {
        return Err(BackupError::NotFound(format!(
            "database file not found at {}",
            paths.database.display()
        )));
    }

    let _lock = BackupLock::acquire(&config.lock_path())?;

    info!(archive = %filename, database = %paths.database.display(), "creating backup");

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir()
        .map_err(BackupError::io(&std::env::temp_dir()))?;

    stage_snapshot(&paths, settings, staging.path())?;
    pack(tools, staging.path(), &archive_path)?;

    if let Err(e) = staging.close() {
        warn!(error = %e, "could not remove staging directory");
    }

    let info = describe_archive(&archive_path)?;
    info!(
        archive = %info.filename,
        size_bytes = info.size_bytes,
        "backup created"
    );
    Ok(info)
}

/// Copy the database, uploads tree and settings into `staging`
fn stage_snapshot(
    paths: &ResolvedPaths,
    settings: &dyn SettingsStore,
    staging: &Path,
) -> BackupResult<()> {
    let db_target = staging.join(DB_MEMBER);
    fs::copy(&paths.database, &db_target).map_err(BackupError::io(&paths.database))?;

    let uploads_target = staging.join(UPLOADS_MEMBER);
    if paths.uploads.is_dir() {
        copy_tree(
            &paths.uploads,
            &uploads_target,
            CopyOptions {
                dereference_symlinks: true,
            },
        )
        .map_err(BackupError::io(&paths.uploads))?;
    } else {
        // archives always carry the uploads member, even when empty
        fs::create_dir_all(&uploads_target).map_err(BackupError::io(&uploads_target))?;
    }

    let snapshot = settings.snapshot()?;
    let settings_target = staging.join(SETTINGS_MEMBER);
    fs::write(&settings_target, serde_json::to_string_pretty(&snapshot)?)
        .map_err(BackupError::io(&settings_target))?;

    Ok(())
}

/// Pack the staged members into `archive_path`
///
/// tar writes to a hidden partial file that is renamed into place once
/// complete, so a failed pack never leaves an archive that lists or restores.
fn pack(tools: &dyn ToolRunner, staging: &Path, archive_path: &Path) -> BackupResult<()> {
    let mut partial_name = std::ffi::OsString::from(".");
    partial_name.push(archive_path.file_name().unwrap_or_default());
    partial_name.push(".partial");
    let partial = archive_path.with_file_name(partial_name);

    let result = tar::create(
        tools,
        staging,
        &partial,
        &[DB_MEMBER, UPLOADS_MEMBER, SETTINGS_MEMBER],
    )
    .and_then(|()| fs::rename(&partial, archive_path).map_err(BackupError::io(archive_path)));

    if result.is_err() && partial.exists() {
        let _ = fs::remove_file(&partial);
    }
    result
}

/// Stat an archive into a [`BackupInfo`]
pub(crate) fn describe_archive(path: &Path) -> BackupResult<BackupInfo> {
    let meta = fs::metadata(path).map_err(BackupError::io(path))?;
    let created_at_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or(0);

    Ok(BackupInfo {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size_bytes: meta.len(),
        created_at_ms,
    })
}
