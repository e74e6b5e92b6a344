//! tfbackup - TribeFinder server backup administration
//!
//! Provides `tfbackup create`, `list`, `inspect`, `restore` and friends. Every
//! command prints JSON on stdout.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::fs::File;
use std::path::PathBuf;
use tribefinder_backup::backup::{
    create_backup, delete_backup, import_upload, inspect_backup, list_backups, restore_backup,
    sweep_old_backups,
};
use tribefinder_backup::storage::SqliteSettingsStore;
use tribefinder_backup::{BackupConfig, BackupError, BackupResult};
use tribefinder_cli::{init_logging, load_config, open_live_database, run_auto, system_tools};

#[derive(Parser)]
#[command(name = "tfbackup")]
#[command(about = "TribeFinder server backup administration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a backup of the database, uploads and settings
    Create,
    /// List backups, newest first
    List,
    /// Show row counts and upload counts of a backup without restoring it
    Inspect {
        /// Backup filename
        file: String,
    },
    /// Replace the live database and uploads with a backup's contents
    Restore {
        /// Backup filename
        file: String,
    },
    /// Delete a backup
    Delete {
        /// Backup filename
        file: String,
    },
    /// Store an externally produced archive in the backups directory
    Import {
        /// Path of the .tar.gz file to import
        path: PathBuf,
    },
    /// Delete all but the newest backups
    Sweep {
        /// Backups to keep (defaults to BACKUP_RETENTION)
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Run the scheduled backup once, honoring the configured interval
    Auto,
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    match run(cli.command) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error [{}]: {e}", e.code());
            std::process::exit(1);
        }
    }
}

fn run(command: Commands) -> BackupResult<Value> {
    let config = load_config()?;

    match command {
        Commands::Create => {
            let db = open_live_database(&config)?;
            let settings = SqliteSettingsStore::new(db.connection());
            let info = create_backup(&config, &system_tools(&config), &settings)?;
            Ok(serde_json::to_value(info)?)
        }
        Commands::List => Ok(serde_json::to_value(list_backups(&config)?)?),
        Commands::Inspect { file } => {
            let inspection = inspect_backup(&config, &system_tools(&config), &file)?;
            Ok(serde_json::to_value(inspection)?)
        }
        Commands::Restore { file } => {
            let outcome = restore_backup(&config, &system_tools(&config), &file)?;
            Ok(serde_json::to_value(outcome)?)
        }
        Commands::Delete { file } => {
            delete_backup(&config, &file)?;
            Ok(json!({ "deleted": file }))
        }
        Commands::Import { path } => run_import(&config, path),
        Commands::Sweep { keep } => {
            let keep = keep.unwrap_or(config.retention);
            let deleted = sweep_old_backups(&config.backups_dir, keep)?;
            Ok(json!({ "kept": keep, "deleted": deleted }))
        }
        Commands::Auto => Ok(serde_json::to_value(run_auto(&config)?)?),
    }
}

fn run_import(config: &BackupConfig, path: PathBuf) -> BackupResult<Value> {
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackupError::NotFound(format!(
                "file not found: {}",
                path.display()
            )))
        }
        Err(source) => return Err(BackupError::Io { path, source }),
    };
    Ok(serde_json::to_value(import_upload(config, file)?)?)
}
