//! Lazily opened secure store shared by both providers.

use std::sync::{Arc, Mutex};

use crate::error::{KeyError, KeyResult};
use crate::traits::{KeystoreOpener, SecureStore};

/// Opens the secure store on first use and hands the same store to every caller.
///
/// A failed open is not cached, so a store that was locked at startup can be
/// opened by a later call.
pub struct SharedKeystore {
    opener: Arc<dyn KeystoreOpener>,
    opened: Mutex<Option<Arc<dyn SecureStore>>>,
}

impl SharedKeystore {
    /// Wraps an opener; nothing is opened yet.
    #[must_use]
    pub fn new(opener: Arc<dyn KeystoreOpener>) -> Self {
        Self {
            opener,
            opened: Mutex::new(None),
        }
    }

    /// Returns the opened store, opening it if this is the first call.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::StoreUnavailable`] if the store cannot be opened.
    pub fn store(&self) -> KeyResult<Arc<dyn SecureStore>> {
        let mut opened = self
            .opened
            .lock()
            .map_err(|_| KeyError::Lock("keystore mutex poisoned".to_string()))?;
        if let Some(store) = opened.as_ref() {
            return Ok(Arc::clone(store));
        }
        let store = self.opener.open().map_err(|err| match err {
            KeyError::StoreUnavailable(_) => err,
            other => KeyError::StoreUnavailable(other.to_string()),
        })?;
        tracing::debug!("secure store opened");
        *opened = Some(Arc::clone(&store));
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKeystore;

    #[test]
    fn test_store_is_opened_once() {
        let keystore = Arc::new(MemoryKeystore::new());
        let shared = SharedKeystore::new(keystore.opener());
        shared.store().expect("first open");
        shared.store().expect("second open");
        assert_eq!(keystore.open_count(), 1);
    }

    #[test]
    fn test_failed_open_is_retried() {
        let keystore = Arc::new(MemoryKeystore::new());
        keystore.set_available(false);
        let shared = SharedKeystore::new(keystore.opener());
        match shared.store() {
            Err(KeyError::StoreUnavailable(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }

        keystore.set_available(true);
        shared.store().expect("open after unlock");
        assert_eq!(keystore.open_count(), 2);
    }
}
