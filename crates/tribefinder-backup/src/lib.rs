//! TribeFinder backup engine - archive creation, inspection, restore and retention
//!
//! Archives are gzip-compressed tarballs holding a copy of the live `SQLite`
//! database, the uploads tree and a JSON snapshot of site settings. Restores
//! swap both live locations atomically where the filesystem allows it.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

pub mod backup;
pub mod config;
pub mod error;
pub mod fsops;
pub mod paths;
pub mod schedule;
pub mod settings;
pub mod storage;
pub mod tools;
pub mod util;

pub use backup::{BackupInfo, Inspection, RestoreOutcome};
pub use config::BackupConfig;
pub use error::{BackupError, BackupResult};
pub use schedule::{run_scheduled, ScheduledRun};
pub use settings::{MemorySettingsStore, SettingsStore};
pub use tools::{SystemTools, ToolRunner};
