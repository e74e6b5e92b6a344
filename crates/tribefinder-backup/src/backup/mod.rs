//! Server backup lifecycle: create, inspect, restore, list and retain archives

pub mod catalog;
pub mod create;
pub mod inspect;
pub mod lock;
pub mod restore;
pub mod types;

pub use catalog::{
    backup_path, delete_backup, import_upload, import_upload_at, list_backups, sweep_old_backups,
};
pub use create::{create_backup, create_backup_at};
pub use inspect::inspect_backup;
pub use lock::BackupLock;
pub use restore::{restore_backup, restore_backup_with};
pub use types::{BackupInfo, Inspection, InspectionWarnings, RestoreOutcome};
