//! Settings table operations

use crate::error::BackupResult;
use crate::settings::{Setting, SettingsStore};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

/// Table holding the application's key/value settings
pub const SETTINGS_TABLE: &str = "SiteSetting";

/// Settings backed by the live database
pub struct SqliteSettingsStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSettingsStore<'a> {
    /// Create a new settings store
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsStore for SqliteSettingsStore<'_> {
    fn find_many(&self, keys: Option<&[&str]>) -> BackupResult<Vec<Setting>> {
        let mut sql = format!(r#"SELECT key, value FROM "{SETTINGS_TABLE}""#);
        let keys = keys.unwrap_or(&[]);
        if !keys.is_empty() {
            let placeholders = vec!["?"; keys.len()].join(", ");
            sql.push_str(&format!(" WHERE key IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY key");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(keys.iter()), |row| {
            Ok(Setting {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?;

        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }

    fn find_unique(&self, key: &str) -> BackupResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                &format!(r#"SELECT value FROM "{SETTINGS_TABLE}" WHERE key = ?1"#),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn upsert(&self, key: &str, value: &str) -> BackupResult<()> {
        self.conn.execute(
            &format!(
                r#"
                INSERT INTO "{SETTINGS_TABLE}" (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#
            ),
            params![key, value],
        )?;
        Ok(())
    }
}
