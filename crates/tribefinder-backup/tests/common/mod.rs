//! Shared fixtures: a throwaway project root with a real SQLite database

#![allow(dead_code)]

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tribefinder_backup::{BackupConfig, SystemTools};
use walkdir::WalkDir;

pub const DATABASE_URL: &str = "file:./prisma/dev.db";

const SCHEMA: &str = r#"
CREATE TABLE "User" (id INTEGER PRIMARY KEY, email TEXT NOT NULL);
CREATE TABLE "Group" (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE "Event" (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
CREATE TABLE "DanceStyle" (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE "UserDanceStyle" (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE "GalleryImage" (id INTEGER PRIMARY KEY, url TEXT NOT NULL);
CREATE TABLE "Feedback" (id INTEGER PRIMARY KEY, message TEXT NOT NULL);
CREATE TABLE "SiteSetting" (key TEXT PRIMARY KEY, value TEXT NOT NULL);
"#;

/// A project root laid out like a deployed application
pub struct Project {
    pub dir: TempDir,
    pub config: BackupConfig,
}

impl Project {
    /// Project with an empty schema and no uploads directory
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path();

        fs::write(root.join("package.json"), r#"{"name":"tribefinder"}"#).unwrap();
        fs::create_dir_all(root.join("prisma")).unwrap();
        fs::write(root.join("prisma/schema.prisma"), "// schema\n").unwrap();

        let conn = Connection::open(root.join("prisma/dev.db")).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        drop(conn);

        let config = BackupConfig::new(root).with_database_url(DATABASE_URL);
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.root().join("prisma/dev.db")
    }

    pub fn uploads(&self) -> PathBuf {
        self.root().join("public/uploads")
    }

    pub fn backups_dir(&self) -> &Path {
        &self.config.backups_dir
    }

    pub fn tools(&self) -> SystemTools {
        SystemTools::new(Duration::from_secs(60))
    }

    /// Insert `n` rows into a table with one text column
    pub fn insert_rows(&self, table: &str, n: usize) {
        let conn = Connection::open(self.db_path()).unwrap();
        let column: String = conn
            .query_row(
                &format!(r#"SELECT name FROM pragma_table_info('{table}') WHERE pk = 0"#),
                [],
                |row| row.get(0),
            )
            .unwrap();
        for i in 0..n {
            conn.execute(
                &format!(r#"INSERT INTO "{table}" ("{column}") VALUES (?1)"#),
                params![format!("{table}-{i}")],
            )
            .unwrap();
        }
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        let conn = Connection::open(self.db_path()).unwrap();
        conn.execute(
            r#"INSERT OR REPLACE INTO "SiteSetting" (key, value) VALUES (?1, ?2)"#,
            params![key, value],
        )
        .unwrap();
    }

    pub fn count(&self, table: &str) -> i64 {
        let conn = Connection::open(self.db_path()).unwrap();
        conn.query_row(&format!(r#"SELECT COUNT(*) FROM "{table}""#), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    /// Write an upload file relative to the uploads directory
    pub fn add_upload(&self, rel: &str, content: &[u8]) {
        let path = self.uploads().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

pub fn hash_file(path: &Path) -> String {
    let content = fs::read(path).unwrap();
    let mut hasher = Sha256::new();
    hasher.update(&content);
    hex::encode(hasher.finalize())
}

/// Relative path -> content hash for every file under `dir`
pub fn snapshot_tree(dir: &Path) -> BTreeMap<String, String> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap().to_string_lossy().into_owned();
            (rel, hash_file(e.path()))
        })
        .collect()
}

/// Names of files directly inside `dir`, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
