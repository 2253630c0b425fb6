//! Platform interfaces the key providers depend on.
//!
//! The secure store (Android Keystore, Keychain, a TPM) and the preference
//! store (`SharedPreferences`, `UserDefaults`, a file) are supplied by the host.
//! Private and in-store symmetric key material never crosses these interfaces;
//! only handles that can perform operations on it do.

use std::sync::Arc;

use crate::config::KeyAlias;
use crate::error::KeyResult;
use crate::keygen::{KeyGenSpec, WrapPadding};

/// A symmetric key held inside the secure store.
///
/// The provider only establishes this key. Payload encryption belongs to the
/// application, which drives it through these operations.
pub trait StoreSecretKey: Send + Sync {
    /// Encrypts `plaintext` inside the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses the operation.
    fn encrypt(&self, plaintext: &[u8]) -> KeyResult<Vec<u8>>;

    /// Decrypts `ciphertext` inside the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses the operation or authentication fails.
    fn decrypt(&self, ciphertext: &[u8]) -> KeyResult<Vec<u8>>;
}

/// The private half of a store-held RSA pair.
pub trait StorePrivateKey: Send + Sync {
    /// RSA-decrypts `ciphertext` inside the store with the given padding.
    ///
    /// Implementations should report cipher failures as
    /// [`KeyError::UnwrapFailed`](crate::KeyError::UnwrapFailed).
    ///
    /// # Errors
    ///
    /// Returns an error if the padding check fails or the store refuses the operation.
    fn decrypt(&self, padding: WrapPadding, ciphertext: &[u8]) -> KeyResult<Vec<u8>>;
}

/// Result of generating an RSA pair inside the store.
pub struct GeneratedKeyPair {
    /// Handle to the private half.
    pub private_key: Arc<dyn StorePrivateKey>,
    /// `SubjectPublicKeyInfo` DER of the public half.
    pub public_key_der: Vec<u8>,
}

/// An opened secure store.
pub trait SecureStore: Send + Sync {
    /// Looks up the symmetric key registered under `alias`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails. A missing key is `Ok(None)`.
    fn secret_key(&self, alias: &KeyAlias) -> KeyResult<Option<Arc<dyn StoreSecretKey>>>;

    /// Looks up the private half of the pair registered under `alias`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails. A missing key is `Ok(None)`.
    fn private_key(&self, alias: &KeyAlias) -> KeyResult<Option<Arc<dyn StorePrivateKey>>>;

    /// Reads the public key out of the certificate registered under `alias`,
    /// as `SubjectPublicKeyInfo` DER.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails. A missing entry is `Ok(None)`.
    fn public_key(&self, alias: &KeyAlias) -> KeyResult<Option<Vec<u8>>>;

    /// Generates a symmetric key inside the store, replacing any key under `alias`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot honour `spec`.
    fn generate_symmetric_key(
        &self,
        alias: &KeyAlias,
        spec: &KeyGenSpec,
    ) -> KeyResult<Arc<dyn StoreSecretKey>>;

    /// Generates an RSA pair inside the store, replacing any pair under `alias`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot honour `spec`.
    fn generate_key_pair(&self, alias: &KeyAlias, spec: &KeyGenSpec)
        -> KeyResult<GeneratedKeyPair>;
}

/// Opens (loads) the platform's secure store.
pub trait KeystoreOpener: Send + Sync {
    /// Opens the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be loaded.
    fn open(&self) -> KeyResult<Arc<dyn SecureStore>>;
}

/// Durable string preferences, local to the device.
pub trait PreferenceStore: Send + Sync {
    /// Reads the value stored under `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn read(&self, name: &str) -> KeyResult<Option<String>>;

    /// Durably stores `value` under `name`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write(&self, name: &str, value: &str) -> KeyResult<()>;
}
