//! Wiring shared by the `tfbackup` and `auto-backup` binaries

use chrono::Utc;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use tribefinder_backup::paths::ResolvedPaths;
use tribefinder_backup::storage::{Database, SqliteSettingsStore};
use tribefinder_backup::{run_scheduled, BackupConfig, BackupError, BackupResult, ScheduledRun, SystemTools};

/// Log directive used when `RUST_LOG` is unset
const DEFAULT_LOG_DIRECTIVE: &str = "tribefinder_backup=info";

/// Install the stderr log subscriber; stdout is reserved for JSON
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load `.env`, then the configuration from the environment
///
/// # Errors
/// Returns `Configuration` if a variable is malformed
pub fn load_config() -> BackupResult<BackupConfig> {
    let _ = dotenvy::dotenv();
    BackupConfig::from_env()
}

/// Tool runner honoring the configured deadline
#[must_use]
pub fn system_tools(config: &BackupConfig) -> SystemTools {
    SystemTools::new(config.tool_timeout)
}

/// Open the live database the settings live in
///
/// # Errors
/// Returns `Configuration` for a bad connection string, `NotFound` if the
/// database file is absent, and `Sqlite` if it cannot be opened
pub fn open_live_database(config: &BackupConfig) -> BackupResult<Database> {
    let paths = ResolvedPaths::resolve(config)?;
    open_existing(&paths.database)
}

fn open_existing(path: &Path) -> BackupResult<Database> {
    if !path.is_file() {
        return Err(BackupError::NotFound(format!(
            "database file not found at {}",
            path.display()
        )));
    }
    Database::open(path)
}

/// One scheduled tick against the live database
///
/// # Errors
/// Propagates any configuration, database, build or sweep failure
pub fn run_auto(config: &BackupConfig) -> BackupResult<ScheduledRun> {
    let db = open_live_database(config)?;
    let settings = SqliteSettingsStore::new(db.connection());
    run_scheduled(config, &system_tools(config), &settings, Utc::now())
}
