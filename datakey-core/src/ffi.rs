//! Foreign-language bindings.
//!
//! The host implements [`ForeignKeystore`] over its platform key store
//! (Android Keystore, Keychain) and [`ForeignPreferences`] over its
//! preference storage. [`DataKeyManager`] wires them into a
//! [`SymmetricKeyProvider`].

use std::path::Path;
use std::sync::Arc;

use crate::capability::{KeyMode, PlatformVersion};
use crate::config::{DataKeyConfig, KeyAlias};
use crate::error::{KeyError, KeyResult};
use crate::handles::SecretKeyHandle;
use crate::keygen::{KeyGenSpec, WrapPadding};
use crate::keystore::SharedKeystore;
use crate::lock::CreationLock;
use crate::symmetric::SymmetricKeyProvider;
use crate::traits::{
    GeneratedKeyPair, KeystoreOpener, PreferenceStore, SecureStore, StorePrivateKey,
    StoreSecretKey,
};

/// A symmetric key living in the host's secure store.
#[uniffi::export(with_foreign)]
pub trait ForeignSecretKey: Send + Sync {
    /// Encrypts `plaintext` with the store-held key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses the operation.
    fn encrypt(&self, plaintext: Vec<u8>) -> KeyResult<Vec<u8>>;

    /// Decrypts `ciphertext` with the store-held key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses the operation.
    fn decrypt(&self, ciphertext: Vec<u8>) -> KeyResult<Vec<u8>>;
}

/// The private half of a pair living in the host's secure store.
#[uniffi::export(with_foreign)]
pub trait ForeignPrivateKey: Send + Sync {
    /// RSA-decrypts `ciphertext` with `padding`.
    ///
    /// # Errors
    ///
    /// Returns an error if decryption fails.
    fn decrypt(&self, padding: WrapPadding, ciphertext: Vec<u8>) -> KeyResult<Vec<u8>>;
}

/// The host's secure key store.
#[uniffi::export(with_foreign)]
pub trait ForeignKeystore: Send + Sync {
    /// Loads the store. Called once, before any other method.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be loaded.
    fn open(&self) -> KeyResult<()>;

    /// Symmetric key under `alias`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn secret_key(&self, alias: String) -> KeyResult<Option<Arc<dyn ForeignSecretKey>>>;

    /// Private key under `alias`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn private_key(&self, alias: String) -> KeyResult<Option<Arc<dyn ForeignPrivateKey>>>;

    /// `SubjectPublicKeyInfo` DER of the certificate under `alias`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn public_key(&self, alias: String) -> KeyResult<Option<Vec<u8>>>;

    /// Generates a symmetric key under `alias`.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails.
    fn generate_symmetric_key(
        &self,
        alias: String,
        spec: KeyGenSpec,
    ) -> KeyResult<Arc<dyn ForeignSecretKey>>;

    /// Generates an RSA pair under `alias` and returns the public key DER.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails.
    fn generate_key_pair(&self, alias: String, spec: KeyGenSpec) -> KeyResult<Vec<u8>>;
}

/// The host's durable string preferences.
#[uniffi::export(with_foreign)]
pub trait ForeignPreferences: Send + Sync {
    /// Value under `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn read(&self, name: String) -> KeyResult<Option<String>>;

    /// Durably stores `value` under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write(&self, name: String, value: String) -> KeyResult<()>;
}

struct SecretKeyAdapter(Arc<dyn ForeignSecretKey>);

impl StoreSecretKey for SecretKeyAdapter {
    fn encrypt(&self, plaintext: &[u8]) -> KeyResult<Vec<u8>> {
        self.0.encrypt(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> KeyResult<Vec<u8>> {
        self.0.decrypt(ciphertext.to_vec())
    }
}

struct PrivateKeyAdapter(Arc<dyn ForeignPrivateKey>);

impl StorePrivateKey for PrivateKeyAdapter {
    fn decrypt(&self, padding: WrapPadding, ciphertext: &[u8]) -> KeyResult<Vec<u8>> {
        self.0.decrypt(padding, ciphertext.to_vec())
    }
}

#[derive(Clone)]
struct KeystoreAdapter(Arc<dyn ForeignKeystore>);

impl KeystoreOpener for KeystoreAdapter {
    fn open(&self) -> KeyResult<Arc<dyn SecureStore>> {
        self.0.open()?;
        Ok(Arc::new(self.clone()))
    }
}

impl SecureStore for KeystoreAdapter {
    fn secret_key(&self, alias: &KeyAlias) -> KeyResult<Option<Arc<dyn StoreSecretKey>>> {
        Ok(self
            .0
            .secret_key(alias.to_string())?
            .map(|key| Arc::new(SecretKeyAdapter(key)) as Arc<dyn StoreSecretKey>))
    }

    fn private_key(&self, alias: &KeyAlias) -> KeyResult<Option<Arc<dyn StorePrivateKey>>> {
        Ok(self
            .0
            .private_key(alias.to_string())?
            .map(|key| Arc::new(PrivateKeyAdapter(key)) as Arc<dyn StorePrivateKey>))
    }

    fn public_key(&self, alias: &KeyAlias) -> KeyResult<Option<Vec<u8>>> {
        self.0.public_key(alias.to_string())
    }

    fn generate_symmetric_key(
        &self,
        alias: &KeyAlias,
        spec: &KeyGenSpec,
    ) -> KeyResult<Arc<dyn StoreSecretKey>> {
        let key = self
            .0
            .generate_symmetric_key(alias.to_string(), spec.clone())?;
        Ok(Arc::new(SecretKeyAdapter(key)))
    }

    fn generate_key_pair(
        &self,
        alias: &KeyAlias,
        spec: &KeyGenSpec,
    ) -> KeyResult<GeneratedKeyPair> {
        let public_key_der = self.0.generate_key_pair(alias.to_string(), spec.clone())?;
        let private_key = self.private_key(alias)?.ok_or_else(|| {
            KeyError::KeyGenerationFailed(format!("no private key under {alias} after generation"))
        })?;
        Ok(GeneratedKeyPair {
            private_key,
            public_key_der,
        })
    }
}

struct PreferencesAdapter(Arc<dyn ForeignPreferences>);

impl PreferenceStore for PreferencesAdapter {
    fn read(&self, name: &str) -> KeyResult<Option<String>> {
        self.0.read(name.to_string())
    }

    fn write(&self, name: &str, value: &str) -> KeyResult<()> {
        self.0.write(name.to_string(), value.to_string())
    }
}

/// The data key as seen by the host.
#[derive(uniffi::Enum)]
pub enum DataKey {
    /// Use the store key registered under `alias`.
    StoreResident {
        /// Alias inside the host's secure store.
        alias: String,
    },
    /// Raw key bytes unwrapped in memory.
    Software {
        /// Key material.
        raw: Vec<u8>,
    },
}

impl From<&SecretKeyHandle> for DataKey {
    fn from(handle: &SecretKeyHandle) -> Self {
        match handle {
            SecretKeyHandle::StoreResident { alias, .. } => Self::StoreResident {
                alias: alias.to_string(),
            },
            SecretKeyHandle::Software(key) => Self::Software {
                raw: key.expose_raw().to_vec(),
            },
        }
    }
}

/// Host-facing entry point.
#[derive(uniffi::Object)]
pub struct DataKeyManager {
    provider: SymmetricKeyProvider,
}

#[uniffi::export]
impl DataKeyManager {
    /// Creates a manager for a device running `api_level`.
    ///
    /// `config_json` overrides the defaults; `lock_path` enables the
    /// cross-process creation lock.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidConfig`] for a bad configuration or
    /// [`KeyError::Lock`] if the lock file cannot be opened.
    #[uniffi::constructor]
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(
        api_level: u32,
        keystore: Arc<dyn ForeignKeystore>,
        preferences: Arc<dyn ForeignPreferences>,
        config_json: Option<String>,
        lock_path: Option<String>,
    ) -> KeyResult<Self> {
        let config = match config_json {
            Some(json) => DataKeyConfig::from_json(&json)?,
            None => DataKeyConfig::default(),
        };
        let shared = Arc::new(SharedKeystore::new(Arc::new(KeystoreAdapter(keystore))));
        let mut provider = SymmetricKeyProvider::new(
            &config,
            &PlatformVersion::new(api_level),
            shared,
            Arc::new(PreferencesAdapter(preferences)),
        )?;
        if let Some(path) = lock_path {
            provider = provider.with_creation_lock(CreationLock::open(Path::new(&path))?);
        }
        Ok(Self { provider })
    }

    /// The mode resolved for this device.
    #[must_use]
    pub fn key_mode(&self) -> KeyMode {
        self.provider.mode()
    }

    /// Returns the data key, establishing it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be recovered or created.
    pub fn get_key(&self) -> KeyResult<DataKey> {
        self.provider.get_key().map(|handle| DataKey::from(&handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryKeystore, MemoryPreferences};

    struct HostSecretKey(Arc<dyn StoreSecretKey>);

    impl ForeignSecretKey for HostSecretKey {
        fn encrypt(&self, plaintext: Vec<u8>) -> KeyResult<Vec<u8>> {
            self.0.encrypt(&plaintext)
        }

        fn decrypt(&self, ciphertext: Vec<u8>) -> KeyResult<Vec<u8>> {
            self.0.decrypt(&ciphertext)
        }
    }

    struct HostPrivateKey(Arc<dyn StorePrivateKey>);

    impl ForeignPrivateKey for HostPrivateKey {
        fn decrypt(&self, padding: WrapPadding, ciphertext: Vec<u8>) -> KeyResult<Vec<u8>> {
            self.0.decrypt(padding, &ciphertext)
        }
    }

    struct HostKeystore(Arc<MemoryKeystore>);

    impl ForeignKeystore for HostKeystore {
        fn open(&self) -> KeyResult<()> {
            Ok(())
        }

        fn secret_key(&self, alias: String) -> KeyResult<Option<Arc<dyn ForeignSecretKey>>> {
            Ok(self
                .0
                .secret_key(&KeyAlias::new(alias))?
                .map(|key| Arc::new(HostSecretKey(key)) as Arc<dyn ForeignSecretKey>))
        }

        fn private_key(&self, alias: String) -> KeyResult<Option<Arc<dyn ForeignPrivateKey>>> {
            Ok(self
                .0
                .private_key(&KeyAlias::new(alias))?
                .map(|key| Arc::new(HostPrivateKey(key)) as Arc<dyn ForeignPrivateKey>))
        }

        fn public_key(&self, alias: String) -> KeyResult<Option<Vec<u8>>> {
            self.0.public_key(&KeyAlias::new(alias))
        }

        fn generate_symmetric_key(
            &self,
            alias: String,
            spec: KeyGenSpec,
        ) -> KeyResult<Arc<dyn ForeignSecretKey>> {
            let key = self.0.generate_symmetric_key(&KeyAlias::new(alias), &spec)?;
            Ok(Arc::new(HostSecretKey(key)))
        }

        fn generate_key_pair(&self, alias: String, spec: KeyGenSpec) -> KeyResult<Vec<u8>> {
            Ok(self
                .0
                .generate_key_pair(&KeyAlias::new(alias), &spec)?
                .public_key_der)
        }
    }

    struct HostPreferences(Arc<MemoryPreferences>);

    impl ForeignPreferences for HostPreferences {
        fn read(&self, name: String) -> KeyResult<Option<String>> {
            self.0.read(&name)
        }

        fn write(&self, name: String, value: String) -> KeyResult<()> {
            self.0.write(&name, &value)
        }
    }

    fn manager(api_level: u32, keystore: &Arc<MemoryKeystore>) -> DataKeyManager {
        DataKeyManager::new(
            api_level,
            Arc::new(HostKeystore(Arc::clone(keystore))),
            Arc::new(HostPreferences(Arc::new(MemoryPreferences::new()))),
            Some(r#"{"rsa_modulus_bits": 1024}"#.to_string()),
            None,
        )
        .expect("manager")
    }

    #[test]
    fn test_modern_manager_returns_alias() {
        let keystore = Arc::new(MemoryKeystore::new());
        let manager = manager(30, &keystore);
        assert_eq!(manager.key_mode(), KeyMode::Modern);
        match manager.get_key().expect("key") {
            DataKey::StoreResident { alias } => assert_eq!(alias, "datakey.aes"),
            DataKey::Software { .. } => panic!("expected a store-resident key"),
        }
    }

    #[test]
    fn test_legacy_manager_returns_raw_key() {
        let keystore = Arc::new(MemoryKeystore::new());
        let manager = manager(21, &keystore);
        assert_eq!(manager.key_mode(), KeyMode::Legacy);
        let DataKey::Software { raw } = manager.get_key().expect("key") else {
            panic!("expected a software key");
        };
        assert_eq!(raw.len(), 16);
        assert_eq!(keystore.key_pair_generations(), 1);
    }

    #[test]
    fn test_bad_config_json_is_rejected() {
        let result = DataKeyManager::new(
            30,
            Arc::new(HostKeystore(Arc::new(MemoryKeystore::new()))),
            Arc::new(HostPreferences(Arc::new(MemoryPreferences::new()))),
            Some(r#"{"unknown_field": true}"#.to_string()),
            None,
        );
        assert!(matches!(result, Err(KeyError::InvalidConfig(_))));
    }
}
