//! Settings keyspace shared by the snapshot and the scheduled checkpoint

use crate::error::BackupResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One key/value configuration row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// Access to the key/value settings table
///
/// Injected into the builder and scheduler so tests can substitute
/// [`MemorySettingsStore`] for the live database.
pub trait SettingsStore {
    /// Fetch all settings, or only `keys` when given
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read
    fn find_many(&self, keys: Option<&[&str]>) -> BackupResult<Vec<Setting>>;

    /// Fetch a single value
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read
    fn find_unique(&self, key: &str) -> BackupResult<Option<String>>;

    /// Insert or replace a value
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be written
    fn upsert(&self, key: &str, value: &str) -> BackupResult<()>;

    /// Flat key→value map of every setting, as embedded in archives
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be read
    fn snapshot(&self) -> BackupResult<BTreeMap<String, String>> {
        Ok(self
            .find_many(None)?
            .into_iter()
            .map(|s| (s.key, s.value))
            .collect())
    }
}

/// In-memory settings, for tests and runs without a live database
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettingsStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `pairs`
    #[must_use]
    pub fn with_values<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: Mutex::new(values),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // a poisoned map is still a consistent map
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn find_many(&self, keys: Option<&[&str]>) -> BackupResult<Vec<Setting>> {
        let values = self.lock();
        Ok(values
            .iter()
            .filter(|(k, _)| keys.map_or(true, |keys| keys.contains(&k.as_str())))
            .map(|(k, v)| Setting {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    fn find_unique(&self, key: &str) -> BackupResult<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn upsert(&self, key: &str, value: &str) -> BackupResult<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
