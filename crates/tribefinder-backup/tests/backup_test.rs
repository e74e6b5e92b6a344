//! End-to-end build, inspect and restore against a real project tree and tar

mod common;

use common::{file_names, hash_file, snapshot_tree, Project};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;
use tribefinder_backup::backup::{
    backup_path, create_backup, delete_backup, inspect_backup, restore_backup,
    restore_backup_with, BackupLock,
};
use tribefinder_backup::fsops::{StdSwapFs, SwapFs, SET_ASIDE_INFIX};
use tribefinder_backup::storage::{Database, SqliteSettingsStore};
use tribefinder_backup::tools::{tar, ToolOutput};
use tribefinder_backup::{BackupError, BackupResult, MemorySettingsStore, ToolRunner};

#[test]
fn test_restore_reproduces_snapshot_byte_for_byte() {
    let project = Project::new();
    project.insert_rows("Group", 2);
    project.insert_rows("User", 4);
    project.add_upload("logo.png", b"\x89PNG original logo");
    project.add_upload("groups/7/cover.jpg", b"cover bytes");

    let db_hash = hash_file(&project.db_path());
    let uploads_before = snapshot_tree(&project.uploads());

    let info = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap();
    assert!(info.filename.starts_with("tribefinder-backup-"));
    assert!(info.filename.ends_with(".tar.gz"));
    assert!(info.size_bytes > 0);

    // diverge from the snapshot
    project.insert_rows("Group", 10);
    fs::remove_file(project.uploads().join("logo.png")).unwrap();
    project.add_upload("new.png", b"added after backup");

    let outcome = restore_backup(&project.config, &project.tools(), &info.filename).unwrap();
    assert!(outcome.restored);
    assert!(outcome.message.contains("Restart"));

    assert_eq!(hash_file(&project.db_path()), db_hash);
    assert_eq!(snapshot_tree(&project.uploads()), uploads_before);
    assert_eq!(project.count("Group"), 2);

    // no set-aside copies survive a successful swap
    for dir in [project.root().join("prisma"), project.root().join("public")] {
        assert!(file_names(&dir).iter().all(|n| !n.contains(SET_ASIDE_INFIX)));
    }
}

#[test]
fn test_restore_removes_stale_journal_files() {
    let project = Project::new();
    let info = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap();

    let wal = project.root().join("prisma/dev.db-wal");
    fs::write(&wal, b"stale wal").unwrap();

    restore_backup(&project.config, &project.tools(), &info.filename).unwrap();
    assert!(!wal.exists());
}

#[test]
fn test_inspect_reports_counts_and_uploads() {
    let project = Project::new();
    project.insert_rows("Group", 3);
    project.insert_rows("Event", 5);
    project.add_upload("a.png", b"a");
    project.add_upload("events/b.png", b"b");
    project.add_upload(".gitkeep", b"");

    let info = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap();
    let inspection = inspect_backup(&project.config, &project.tools(), &info.filename).unwrap();

    assert_eq!(inspection.filename, info.filename);
    assert!(inspection.has_db);
    assert_eq!(inspection.count("Group"), 3);
    assert_eq!(inspection.count("Event"), 5);
    assert_eq!(inspection.count("GalleryImage"), 0);
    assert_eq!(inspection.uploads_file_count, 2);
    assert!(inspection.uncountable.is_empty());
    assert!(!inspection.warnings.has_very_few_data);

    let json = serde_json::to_value(&inspection).unwrap();
    assert_eq!(json["hasDb"], true);
    assert_eq!(json["uploadsFileCount"], 2);
    assert_eq!(json["warnings"]["hasVeryFewData"], false);
}

#[test]
fn test_inspect_does_not_touch_live_state() {
    let project = Project::new();
    project.insert_rows("Group", 1);
    let info = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap();

    project.insert_rows("Group", 3);
    let db_hash = hash_file(&project.db_path());

    inspect_backup(&project.config, &project.tools(), &info.filename).unwrap();
    assert_eq!(hash_file(&project.db_path()), db_hash);
}

#[test]
fn test_empty_uploads_round_trip() {
    let project = Project::new();
    assert!(!project.uploads().exists());

    let info = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap();

    let members = tar::list(&project.tools(), &backup_path(&project.config, &info.filename).unwrap())
        .unwrap();
    assert!(members.iter().any(|m| m.trim_end_matches('/') == "uploads"));

    let inspection = inspect_backup(&project.config, &project.tools(), &info.filename).unwrap();
    assert_eq!(inspection.uploads_file_count, 0);
    assert!(inspection.warnings.has_very_few_data);

    project.add_upload("late.png", b"after backup");
    restore_backup(&project.config, &project.tools(), &info.filename).unwrap();

    assert!(project.uploads().is_dir());
    assert!(snapshot_tree(&project.uploads()).is_empty());
}

#[cfg(unix)]
#[test]
fn test_symlinked_uploads_are_archived_as_content() {
    let project = Project::new();
    let storage = TempDir::new().unwrap();
    fs::write(storage.path().join("real.png"), b"real content").unwrap();
    fs::create_dir_all(project.root().join("public")).unwrap();
    std::os::unix::fs::symlink(storage.path(), project.uploads()).unwrap();

    let info = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap();
    let inspection = inspect_backup(&project.config, &project.tools(), &info.filename).unwrap();
    assert_eq!(inspection.uploads_file_count, 1);

    fs::remove_file(storage.path().join("real.png")).unwrap();
    restore_backup(&project.config, &project.tools(), &info.filename).unwrap();

    // the symlink target was replaced; the link still resolves to it
    assert!(project.uploads().is_symlink());
    assert_eq!(fs::read(project.uploads().join("real.png")).unwrap(), b"real content");
}

#[test]
fn test_archive_carries_settings_snapshot() {
    let project = Project::new();
    project.set_setting("siteName", "TribeFinder");
    project.set_setting("autoBackupIntervalHours", "12");

    let db = Database::open(&project.db_path()).unwrap();
    let settings = SqliteSettingsStore::new(db.connection());
    let info = create_backup(&project.config, &project.tools(), &settings).unwrap();
    drop(db);

    let out = TempDir::new().unwrap();
    let archive = backup_path(&project.config, &info.filename).unwrap();
    tar::extract(&project.tools(), &archive, out.path()).unwrap();

    let raw = fs::read_to_string(out.path().join("settings.json")).unwrap();
    let parsed: BTreeMap<String, String> = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.get("siteName").map(String::as_str), Some("TribeFinder"));
    assert_eq!(parsed.len(), 2);
}

#[test]
fn test_restore_accepts_legacy_layout() {
    let project = Project::new();
    project.insert_rows("Group", 1);

    // an older archive: database and uploads under their in-project paths
    let legacy = Project::new();
    legacy.insert_rows("Group", 2);
    legacy.add_upload("old.png", b"from the old layout");
    fs::create_dir_all(project.backups_dir()).unwrap();
    let name = "tribefinder-backup-legacy.tar.gz";
    tar::create(
        &project.tools(),
        legacy.root(),
        &project.backups_dir().join(name),
        &["prisma/dev.db", "public/uploads"],
    )
    .unwrap();

    let inspection = inspect_backup(&project.config, &project.tools(), name).unwrap();
    assert!(!inspection.has_db);
    assert_eq!(inspection.uploads_file_count, 0);

    restore_backup(&project.config, &project.tools(), name).unwrap();
    assert_eq!(project.count("Group"), 2);
    assert_eq!(
        fs::read(project.uploads().join("old.png")).unwrap(),
        b"from the old layout"
    );
}

#[test]
fn test_restore_without_members_is_integrity_error() {
    let project = Project::new();
    project.insert_rows("Group", 1);
    project.add_upload("keep.png", b"keep");
    let db_hash = hash_file(&project.db_path());

    let staging = TempDir::new().unwrap();
    fs::write(staging.path().join("settings.json"), "{}").unwrap();
    fs::write(staging.path().join("notes.txt"), "hello").unwrap();
    fs::create_dir_all(project.backups_dir()).unwrap();
    let name = "upload-2026-01-01T00-00-00-000Z.tar.gz";
    tar::create(
        &project.tools(),
        staging.path(),
        &project.backups_dir().join(name),
        &["settings.json", "notes.txt"],
    )
    .unwrap();

    let err = restore_backup(&project.config, &project.tools(), name).unwrap_err();
    match &err {
        BackupError::Integrity { missing, found } => {
            assert_eq!(missing, &vec!["db.sqlite".to_string(), "uploads/".to_string()]);
            assert!(found.contains(&"settings.json".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.code(), "INTEGRITY_ERROR");

    assert_eq!(hash_file(&project.db_path()), db_hash);
    assert!(project.uploads().join("keep.png").is_file());
}

/// Pack `db.sqlite` plus an uploads tree laid out by `build` into an upload archive
#[cfg(unix)]
fn pack_uploaded_archive(project: &Project, name: &str, build: impl FnOnce(&Path)) {
    let staging = TempDir::new().unwrap();
    fs::copy(project.db_path(), staging.path().join("db.sqlite")).unwrap();
    build(staging.path());
    fs::create_dir_all(project.backups_dir()).unwrap();
    tar::create(
        &project.tools(),
        staging.path(),
        &project.backups_dir().join(name),
        &["db.sqlite", "uploads"],
    )
    .unwrap();
}

#[cfg(unix)]
#[test]
fn test_restore_rejects_symlinked_uploads_member() {
    let project = Project::new();
    project.add_upload("keep.png", b"keep");
    let db_hash = hash_file(&project.db_path());

    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("secret.txt"), "private").unwrap();
    let name = "upload-linked.tar.gz";
    pack_uploaded_archive(&project, name, |staging| {
        std::os::unix::fs::symlink(outside.path(), staging.join("uploads")).unwrap();
    });

    let err = restore_backup(&project.config, &project.tools(), name).unwrap_err();
    assert!(matches!(&err, BackupError::UnsafeMember(m) if m == "uploads"), "{err}");
    assert_eq!(err.code(), "INTEGRITY_ERROR");

    assert!(!project.uploads().is_symlink());
    assert!(project.uploads().join("keep.png").is_file());
    assert!(!project.uploads().join("secret.txt").exists());
    assert_eq!(hash_file(&project.db_path()), db_hash);
}

#[cfg(unix)]
#[test]
fn test_restore_rejects_nested_symlink() {
    let project = Project::new();
    project.add_upload("keep.png", b"keep");

    let name = "upload-nested-link.tar.gz";
    pack_uploaded_archive(&project, name, |staging| {
        fs::create_dir_all(staging.join("uploads/groups")).unwrap();
        fs::write(staging.join("uploads/groups/a.png"), b"a").unwrap();
        std::os::unix::fs::symlink("/etc/passwd", staging.join("uploads/groups/passwd")).unwrap();
    });

    let err = restore_backup(&project.config, &project.tools(), name).unwrap_err();
    assert!(matches!(&err, BackupError::UnsafeMember(m) if m.ends_with("passwd")), "{err}");
    assert!(project.uploads().join("keep.png").is_file());
    assert!(!project.uploads().join("groups").exists());
}

#[cfg(unix)]
#[test]
fn test_inspect_ignores_symlinked_database_member() {
    let project = Project::new();
    let name = "upload-linked-db.tar.gz";

    let staging = TempDir::new().unwrap();
    std::os::unix::fs::symlink(project.db_path(), staging.path().join("db.sqlite")).unwrap();
    fs::create_dir_all(staging.path().join("uploads")).unwrap();
    fs::create_dir_all(project.backups_dir()).unwrap();
    tar::create(
        &project.tools(),
        staging.path(),
        &project.backups_dir().join(name),
        &["db.sqlite", "uploads"],
    )
    .unwrap();

    let inspection = inspect_backup(&project.config, &project.tools(), name).unwrap();
    assert!(!inspection.has_db);

    let err = restore_backup(&project.config, &project.tools(), name).unwrap_err();
    assert!(matches!(&err, BackupError::UnsafeMember(m) if m == "db.sqlite"), "{err}");
}

#[test]
fn test_missing_database_fails_build() {
    let project = Project::new();
    fs::remove_file(project.db_path()).unwrap();

    let err = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));
}

#[test]
fn test_non_file_url_fails_build() {
    let project = Project::new();
    let config = project
        .config
        .clone()
        .with_database_url("postgresql://localhost/tribefinder");

    let err = create_backup(&config, &project.tools(), &MemorySettingsStore::new()).unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION_ERROR");
}

#[test]
fn test_missing_archive_is_not_found() {
    let project = Project::new();
    let name = "tribefinder-backup-2020-01-01T00-00-00-000Z.tar.gz";

    let err = inspect_backup(&project.config, &project.tools(), name).unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));
    let err = restore_backup(&project.config, &project.tools(), name).unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));
    let err = delete_backup(&project.config, name).unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));
}

/// Records every invocation and never runs anything
#[derive(Default)]
struct RecordingTools {
    calls: Mutex<Vec<String>>,
}

impl ToolRunner for RecordingTools {
    fn run(&self, program: &str, _args: &[OsString], _cwd: Option<&Path>) -> BackupResult<ToolOutput> {
        self.calls.lock().unwrap().push(program.to_string());
        Ok(ToolOutput {
            exit_code: Some(0),
            ..ToolOutput::default()
        })
    }
}

#[test]
fn test_unsafe_filenames_rejected_before_any_access() {
    let project = Project::new();
    let config = project.config.clone().with_backups_dir("never-created");
    let tools = RecordingTools::default();

    let names = [
        "../prisma/dev.db",
        "tribefinder-backup-../../x.tar.gz",
        "tribefinder-backup-a/b.tar.gz",
        "upload-a\\b.tar.gz",
        "tribefinder-backup-x.zip",
        "evil.tar.gz",
        "upload-x.tar.gz\0",
        "",
    ];

    for name in names {
        for err in [
            inspect_backup(&config, &tools, name).unwrap_err(),
            restore_backup(&config, &tools, name).unwrap_err(),
            delete_backup(&config, name).unwrap_err(),
            backup_path(&config, name).unwrap_err(),
        ] {
            assert!(matches!(err, BackupError::Validation(_)), "{name:?}: {err}");
            assert_eq!(err.code(), "VALIDATION_ERROR");
        }
    }

    assert!(tools.calls.lock().unwrap().is_empty());
    assert!(!config.backups_dir.exists());
}

/// Fails the rename of a replacement into place and every copy
struct BrokenSwap;

impl SwapFs for BrokenSwap {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let setting_aside = to.to_string_lossy().contains(SET_ASIDE_INFIX);
        let moving_back = from.to_string_lossy().contains(SET_ASIDE_INFIX);
        if setting_aside || moving_back {
            StdSwapFs.rename(from, to)
        } else {
            Err(io::Error::new(io::ErrorKind::Other, "cross-device link"))
        }
    }

    fn copy_all(&self, _from: &Path, to: &Path) -> io::Result<()> {
        fs::write(to, b"half a database")?;
        Err(io::Error::new(io::ErrorKind::Other, "disk full"))
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        StdSwapFs.remove_all(path)
    }
}

#[test]
fn test_failed_swap_keeps_original_database() {
    let project = Project::new();
    project.insert_rows("Group", 1);
    let info = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap();

    project.insert_rows("Group", 4);
    let db_hash = hash_file(&project.db_path());

    let err = restore_backup_with(&project.config, &project.tools(), &BrokenSwap, &info.filename)
        .unwrap_err();
    assert_eq!(err.code(), "IO_ERROR");

    assert_eq!(hash_file(&project.db_path()), db_hash);
    assert_eq!(project.count("Group"), 5);
    assert!(file_names(&project.root().join("prisma"))
        .iter()
        .all(|n| !n.contains(SET_ASIDE_INFIX)));
}

#[test]
fn test_restore_recovers_interrupted_swap() {
    let project = Project::new();
    project.insert_rows("Group", 2);
    let info = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap();

    // simulate a crash between setting the database aside and the rename in
    let aside = project
        .root()
        .join(format!("prisma/dev.db{SET_ASIDE_INFIX}crashed"));
    fs::rename(project.db_path(), &aside).unwrap();

    restore_backup(&project.config, &project.tools(), &info.filename).unwrap();
    assert_eq!(project.count("Group"), 2);
    assert!(!aside.exists());
}

#[test]
fn test_concurrent_operations_are_locked_out() {
    let project = Project::new();
    let info = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap();

    let held = BackupLock::acquire(&project.config.lock_path()).unwrap();

    let err = create_backup(&project.config, &project.tools(), &MemorySettingsStore::new())
        .unwrap_err();
    assert!(matches!(err, BackupError::Locked(_)));
    let err = restore_backup(&project.config, &project.tools(), &info.filename).unwrap_err();
    assert_eq!(err.code(), "LOCKED");
    let err = delete_backup(&project.config, &info.filename).unwrap_err();
    assert_eq!(err.code(), "LOCKED");

    // inspection is read-only and takes no lock
    inspect_backup(&project.config, &project.tools(), &info.filename).unwrap();

    drop(held);
    delete_backup(&project.config, &info.filename).unwrap();
}
