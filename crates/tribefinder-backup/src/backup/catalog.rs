//! Listing, retrieval, deletion, upload intake and retention of archives

use crate::backup::create::describe_archive;
use crate::backup::lock::BackupLock;
use crate::backup::types::{upload_filename, BackupInfo};
use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use crate::util::{contained_join, is_safe_backup_filename};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// First two bytes of every gzip stream
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upload names tried before giving up on a free one
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Archives in the backups directory, newest first
///
/// Files whose names fail the filename predicate are ignored. A missing
/// directory lists as empty.
///
/// # Errors
/// Returns `Io` if the directory exists but cannot be read
pub fn list_backups(config: &BackupConfig) -> BackupResult<Vec<BackupInfo>> {
    let mut backups = Vec::new();
    for (path, _) in archive_entries(&config.backups_dir)? {
        backups.push(describe_archive(&path)?);
    }
    backups.sort_by(|a, b| {
        b.created_at_ms
            .cmp(&a.created_at_ms)
            .then_with(|| b.filename.cmp(&a.filename))
    });
    Ok(backups)
}

/// Absolute path of an archive, for streaming it to a client
///
/// # Errors
/// Returns `Validation` for an unsafe filename and `NotFound` if absent
pub fn backup_path(config: &BackupConfig, filename: &str) -> BackupResult<PathBuf> {
    let path = contained_join(&config.backups_dir, filename)?;
    if !path.is_file() {
        return Err(BackupError::NotFound(format!("backup {filename} does not exist")));
    }
    Ok(path)
}

/// Delete one archive
///
/// # Errors
/// Returns `Validation` for an unsafe filename, `NotFound` if absent, `Locked`
/// if another operation is running, and `Io` if removal fails
pub fn delete_backup(config: &BackupConfig, filename: &str) -> BackupResult<()> {
    let path = backup_path(config, filename)?;
    let _lock = BackupLock::acquire(&config.lock_path())?;

    fs::remove_file(&path).map_err(BackupError::io(&path))?;
    info!(archive = %filename, "deleted backup");
    Ok(())
}

/// Store an administrator-supplied archive as `upload-<timestamp>.tar.gz`
///
/// The stream is written to a temporary file inside the backups directory and
/// persisted under its final name only once complete.
///
/// # Errors
/// Returns `Validation` if the content is not gzip data, `Locked` if another
/// operation is running, and `Io` if writing fails
pub fn import_upload(config: &BackupConfig, source: impl Read) -> BackupResult<BackupInfo> {
    import_upload_at(config, source, Utc::now())
}

/// [`import_upload`] with an explicit timestamp for the archive name
///
/// An existing archive is never replaced: on a name collision the timestamp
/// moves forward one millisecond at a time.
///
/// # Errors
/// See [`import_upload`]
pub fn import_upload_at(
    config: &BackupConfig,
    mut source: impl Read,
    mut at: DateTime<Utc>,
) -> BackupResult<BackupInfo> {
    let dir = &config.backups_dir;
    fs::create_dir_all(dir).map_err(BackupError::io(dir))?;

    let mut magic = [0u8; 2];
    let read = read_prefix(&mut source, &mut magic).map_err(BackupError::io(dir))?;
    if read < magic.len() || magic != GZIP_MAGIC {
        return Err(BackupError::Validation(
            "uploaded file is not a gzip-compressed archive".to_string(),
        ));
    }

    let _lock = BackupLock::acquire(&config.lock_path())?;

    let mut temp = tempfile::Builder::new()
        .prefix(".upload-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(BackupError::io(dir))?;
    if let Err(e) = write_upload(&mut temp, &magic, &mut source) {
        return Err(BackupError::io(temp.path())(e));
    }

    let mut attempts = 0;
    let target = loop {
        let target = contained_join(dir, &upload_filename(at))?;
        match temp.persist_noclobber(&target) {
            Ok(_) => break target,
            Err(e)
                if e.error.kind() == io::ErrorKind::AlreadyExists
                    && attempts < MAX_NAME_ATTEMPTS =>
            {
                temp = e.file;
                at += Duration::milliseconds(1);
                attempts += 1;
            }
            Err(e) => return Err(BackupError::io(&target)(e.error)),
        }
    };

    let info = describe_archive(&target)?;
    info!(archive = %info.filename, size_bytes = info.size_bytes, "stored uploaded backup");
    Ok(info)
}

fn write_upload(temp: &mut NamedTempFile, magic: &[u8], source: &mut impl Read) -> io::Result<()> {
    temp.write_all(magic)?;
    io::copy(source, temp)?;
    temp.as_file().sync_all()
}

fn read_prefix(source: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Keep the newest `keep` archives by modification time and delete the rest
///
/// Deletion is best-effort: a file that cannot be removed is logged and
/// skipped. Returns the names actually deleted.
///
/// # Errors
/// Returns `Io` if the directory exists but cannot be read
pub fn sweep_old_backups(dir: &Path, keep: usize) -> BackupResult<Vec<String>> {
    let mut archives = archive_entries(dir)?;
    archives.sort_by(|(a_path, a_time), (b_path, b_time)| {
        b_time.cmp(a_time).then_with(|| b_path.cmp(a_path))
    });

    let mut deleted = Vec::new();
    for (path, _) in archives.into_iter().skip(keep) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(archive = %name, "removed old backup");
                deleted.push(name);
            }
            Err(e) => warn!(archive = %name, error = %e, "could not remove old backup"),
        }
    }

    Ok(deleted)
}

/// Regular files in `dir` whose names pass the filename predicate, with
/// their modification times
fn archive_entries(dir: &Path) -> BackupResult<Vec<(PathBuf, SystemTime)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BackupError::io(dir)(e)),
    };

    let mut archives = Vec::new();
    for entry in entries {
        let entry = entry.map_err(BackupError::io(dir))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_safe_backup_filename(name) {
            continue;
        }

        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        archives.push((entry.path(), modified));
    }

    Ok(archives)
}
