//! Storage layer (`SQLite` access to the live database and extracted copies)

pub mod counts;
pub mod db;
pub mod settings;

pub use counts::{count_rows, RowCounts, COUNTED_TABLES};
pub use db::Database;
pub use settings::{SqliteSettingsStore, SETTINGS_TABLE};
