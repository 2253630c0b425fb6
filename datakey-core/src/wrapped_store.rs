//! Persistence of the wrapped key record.

use std::sync::Arc;

use crate::error::{KeyError, KeyResult};
use crate::record::WrappedKeyRecord;
use crate::traits::PreferenceStore;

/// Reads and writes the wrapped key record under a fixed preference name.
///
/// Only ciphertext ever passes through here.
#[derive(Clone)]
pub struct WrappedKeyStore {
    preferences: Arc<dyn PreferenceStore>,
    name: String,
}

impl WrappedKeyStore {
    /// Binds the store to the preference `name`.
    #[must_use]
    pub fn new(preferences: Arc<dyn PreferenceStore>, name: impl Into<String>) -> Self {
        Self {
            preferences,
            name: name.into(),
        }
    }

    /// The preference name records are stored under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw encoded value, if one has been persisted.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::PersistenceFailed`] if the read fails.
    pub fn get(&self) -> KeyResult<Option<String>> {
        self.preferences.read(&self.name).map_err(persistence)
    }

    /// Persists a raw encoded value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::PersistenceFailed`] if the write fails.
    pub fn put(&self, value: &str) -> KeyResult<()> {
        self.preferences.write(&self.name, value).map_err(persistence)
    }

    /// Reads and decodes the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the stored value cannot be decoded.
    pub fn load(&self) -> KeyResult<Option<WrappedKeyRecord>> {
        self.get()?
            .map(|value| WrappedKeyRecord::decode(&value))
            .transpose()
    }

    /// Encodes and persists `record`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::PersistenceFailed`] if encoding or the write fails.
    pub fn save(&self, record: &WrappedKeyRecord) -> KeyResult<()> {
        self.put(&record.encode()?)
    }
}

fn persistence(err: KeyError) -> KeyError {
    match err {
        KeyError::PersistenceFailed(_) => err,
        other => KeyError::PersistenceFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPreferences;

    #[test]
    fn test_get_put_are_opaque() {
        let preferences = Arc::new(MemoryPreferences::new());
        let store = WrappedKeyStore::new(preferences.clone(), "wrapped");
        assert!(store.get().expect("get").is_none());
        assert!(store.load().expect("load").is_none());

        store.put("opaque-value").expect("put");
        assert_eq!(store.get().expect("get").as_deref(), Some("opaque-value"));
        assert_eq!(preferences.value("wrapped").as_deref(), Some("opaque-value"));
    }

    #[test]
    fn test_undecodable_value_is_corrupt() {
        let preferences = Arc::new(MemoryPreferences::new());
        let store = WrappedKeyStore::new(preferences, "wrapped");
        store.put("%%%").expect("put");
        assert!(matches!(store.load(), Err(KeyError::CorruptRecord(_))));
    }

    #[test]
    fn test_write_failures_surface_as_persistence_errors() {
        let preferences = Arc::new(MemoryPreferences::new());
        preferences.set_fail_writes(true);
        let store = WrappedKeyStore::new(preferences.clone(), "wrapped");
        match store.put("value") {
            Err(KeyError::PersistenceFailed(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(preferences.write_count(), 0);
    }
}
