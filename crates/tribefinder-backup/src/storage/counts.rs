//! Read-only row counts against an extracted database copy

use crate::storage::Database;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Tables reported by archive inspection, keyed by model name
pub const COUNTED_TABLES: [&str; 8] = [
    "User",
    "Group",
    "Event",
    "DanceStyle",
    "UserDanceStyle",
    "GalleryImage",
    "SiteSetting",
    "Feedback",
];

/// Per-table row counts
///
/// A table whose query failed counts as zero and is also listed in
/// `uncountable`, so "empty" and "could not tell" stay distinguishable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub counts: BTreeMap<String, u64>,
    pub uncountable: Vec<String>,
}

impl RowCounts {
    /// Count for `table`, zero when unknown
    #[must_use]
    pub fn get(&self, table: &str) -> u64 {
        self.counts.get(table).copied().unwrap_or(0)
    }
}

/// Count rows of every table in [`COUNTED_TABLES`]
///
/// Never fails: an unopenable file marks every table uncountable.
#[must_use]
pub fn count_rows(db_path: &Path) -> RowCounts {
    let mut result = RowCounts::default();

    let db = match Database::open_read_only(db_path) {
        Ok(db) => db,
        Err(e) => {
            warn!(path = %db_path.display(), error = %e, "cannot open extracted database");
            for table in COUNTED_TABLES {
                result.counts.insert(table.to_string(), 0);
                result.uncountable.push(table.to_string());
            }
            return result;
        }
    };

    for table in COUNTED_TABLES {
        let sql = format!(r#"SELECT COUNT(*) FROM "{table}""#);
        let count = db
            .connection()
            .query_row(&sql, [], |row| row.get::<_, i64>(0));

        match count {
            Ok(n) => {
                result
                    .counts
                    .insert(table.to_string(), u64::try_from(n).unwrap_or(0));
            }
            Err(e) => {
                warn!(table, error = %e, "row count failed");
                result.counts.insert(table.to_string(), 0);
                result.uncountable.push(table.to_string());
            }
        }
    }

    result
}
