//! Preference storage
//!
//! Durable key/value storage for the last-known server and the tunnel start
//! timestamp. Stores are passed to consumers by construction; there is no
//! ambient global settings object.

use crate::error::PreferenceError;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod toml_store;
pub mod vpn_prefs;

pub use toml_store::TomlPreferenceStore;
pub use vpn_prefs::VpnPreferences;

/// String-keyed preference storage
///
/// Implementations only promise last-write-wins semantics. Calls are
/// infrequent and synchronous from the caller's point of view.
pub trait PreferenceStore: Send + Sync {
    /// Read a value, `None` if the key is absent
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError>;

    /// Write several values at once; on error none of them are applied
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), PreferenceError>;

    /// Remove a key; removing an absent key is not an error
    fn remove(&self, key: &str) -> Result<(), PreferenceError>;

    /// Remove every key
    fn clear(&self) -> Result<(), PreferenceError>;
}

/// In-memory preference store
///
/// Used by tests and by ephemeral sessions that should not touch disk.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), PreferenceError> {
        let mut values = self.values();
        for (key, value) in entries {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        self.values().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), PreferenceError> {
        self.values().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryPreferenceStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("2".to_string()));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);

        // Removing an absent key is fine
        store.remove("a").unwrap();
    }

    #[test]
    fn test_memory_store_set_all() {
        let store = MemoryPreferenceStore::new();
        store.set("a", "old").unwrap();
        store.set_all(&[("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
        assert_eq!(store.get("b").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn test_memory_store_clear() {
        let store = MemoryPreferenceStore::new();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.clear().unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), None);
    }
}
