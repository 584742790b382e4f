//! TOML-file backed preference store
//!
//! Keeps a flat string table in `preferences.toml` inside the configuration
//! directory. Every mutation is written through immediately and only becomes
//! visible to readers once the file write succeeded.

use super::PreferenceStore;
use crate::error::PreferenceError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Default preference file name
pub const PREFERENCES_FILE_NAME: &str = "preferences.toml";

/// Preference store persisted as a TOML table
#[derive(Debug)]
pub struct TomlPreferenceStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl TomlPreferenceStore {
    /// Open the store at `path`, creating an empty one if the file is missing
    ///
    /// # Errors
    ///
    /// Returns `PreferenceError::ReadFailed` if the file exists but cannot be
    /// read or parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PreferenceError> {
        let path = path.as_ref().to_path_buf();

        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| PreferenceError::ReadFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preference file at {:?}, starting empty", path);
                BTreeMap::new()
            }
            Err(e) => {
                return Err(PreferenceError::ReadFailed {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), PreferenceError> {
        let write_failed = |message: String| PreferenceError::WriteFailed {
            path: self.path.display().to_string(),
            message,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_failed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(values).map_err(|e| write_failed(e.to_string()))?;
        std::fs::write(&self.path, contents).map_err(|e| write_failed(e.to_string()))
    }

    /// Apply `change` to a copy of the table, persist it, then swap it in
    ///
    /// `change` returns whether anything changed; unchanged tables are not
    /// written.
    fn mutate<F>(&self, change: F) -> Result<(), PreferenceError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let mut values = self.values();
        let mut updated = values.clone();
        if !change(&mut updated) {
            return Ok(());
        }
        self.persist(&updated)?;
        *values = updated;
        Ok(())
    }
}

impl PreferenceStore for TomlPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.mutate(|values| {
            values.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), PreferenceError> {
        self.mutate(|values| {
            for (key, value) in entries {
                values.insert(key.to_string(), value.to_string());
            }
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        self.mutate(|values| values.remove(key).is_some())
    }

    fn clear(&self) -> Result<(), PreferenceError> {
        self.mutate(|values| {
            values.clear();
            true
        })
    }
}
