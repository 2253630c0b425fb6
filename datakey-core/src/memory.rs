//! In-memory implementations of the platform traits for testing.
//!
//! These are NOT secure for production use. Keys live in ordinary process
//! memory; they exist so the providers can be exercised without a device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use rand::{rngs::OsRng, RngCore};
use rsa::pkcs8::EncodePublicKey;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::config::KeyAlias;
use crate::error::{KeyError, KeyResult};
use crate::keygen::{KeyAlgorithm, KeyGenSpec, WrapPadding};
use crate::keystore::SharedKeystore;
use crate::traits::{
    GeneratedKeyPair, KeystoreOpener, PreferenceStore, SecureStore, StorePrivateKey,
    StoreSecretKey,
};

const NONCE_LEN: usize = 12;

// =============================================================================
// Memory Keystore
// =============================================================================

/// AES-GCM key standing in for a non-extractable store key.
///
/// Output format is `nonce (12 bytes) || ciphertext || tag`.
pub struct MemorySecretKey {
    key: Zeroizing<Vec<u8>>,
}

impl StoreSecretKey for MemorySecretKey {
    fn encrypt(&self, plaintext: &[u8]) -> KeyResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = match self.key.len() {
            16 => Aes128Gcm::new_from_slice(&self.key)
                .map_err(|err| KeyError::Store(err.to_string()))?
                .encrypt(Nonce::from_slice(&nonce), plaintext),
            _ => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|err| KeyError::Store(err.to_string()))?
                .encrypt(Nonce::from_slice(&nonce), plaintext),
        }
        .map_err(|err| KeyError::Store(format!("encrypt: {err}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> KeyResult<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(KeyError::Store("ciphertext too short".to_string()));
        }
        let (nonce, payload) = ciphertext.split_at(NONCE_LEN);
        match self.key.len() {
            16 => Aes128Gcm::new_from_slice(&self.key)
                .map_err(|err| KeyError::Store(err.to_string()))?
                .decrypt(Nonce::from_slice(nonce), payload),
            _ => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|err| KeyError::Store(err.to_string()))?
                .decrypt(Nonce::from_slice(nonce), payload),
        }
        .map_err(|err| KeyError::Store(format!("decrypt: {err}")))
    }
}

/// RSA private key standing in for a store-held private half.
pub struct MemoryPrivateKey {
    key: RsaPrivateKey,
}

impl StorePrivateKey for MemoryPrivateKey {
    fn decrypt(&self, padding: WrapPadding, ciphertext: &[u8]) -> KeyResult<Vec<u8>> {
        let plaintext = match padding {
            WrapPadding::Pkcs1v15 => self.key.decrypt(Pkcs1v15Encrypt, ciphertext),
            WrapPadding::OaepSha256 => self.key.decrypt(Oaep::new::<Sha256>(), ciphertext),
        };
        plaintext.map_err(|err| KeyError::UnwrapFailed(err.to_string()))
    }
}

#[derive(Default)]
struct KeystoreState {
    secrets: HashMap<KeyAlias, Arc<MemorySecretKey>>,
    private_keys: HashMap<KeyAlias, Arc<MemoryPrivateKey>>,
    public_keys: HashMap<KeyAlias, Vec<u8>>,
}

/// In-memory secure store.
///
/// Counts opens and generations, and can be told to refuse opening or
/// generation to exercise error paths.
pub struct MemoryKeystore {
    state: RwLock<KeystoreState>,
    available: AtomicBool,
    fail_generation: AtomicBool,
    opens: AtomicUsize,
    symmetric_generations: AtomicUsize,
    key_pair_generations: AtomicUsize,
}

impl MemoryKeystore {
    /// Creates an empty, available keystore.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(KeystoreState::default()),
            available: AtomicBool::new(true),
            fail_generation: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            symmetric_generations: AtomicUsize::new(0),
            key_pair_generations: AtomicUsize::new(0),
        }
    }

    /// An opener handing out this keystore.
    #[must_use]
    pub fn opener(self: &Arc<Self>) -> Arc<dyn KeystoreOpener> {
        Arc::new(MemoryOpener {
            keystore: Arc::clone(self),
        })
    }

    /// Makes subsequent opens fail (`false`) or succeed (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes subsequent key generation fail.
    pub fn set_fail_generation(&self, fail: bool) {
        self.fail_generation.store(fail, Ordering::SeqCst);
    }

    /// Number of open attempts, successful or not.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of symmetric keys generated.
    #[must_use]
    pub fn symmetric_generations(&self) -> usize {
        self.symmetric_generations.load(Ordering::SeqCst)
    }

    /// Number of key pairs generated.
    #[must_use]
    pub fn key_pair_generations(&self) -> usize {
        self.key_pair_generations.load(Ordering::SeqCst)
    }

    /// Number of stored entries (secret keys, private keys and certificates).
    #[must_use]
    pub fn entry_count(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.secrets.len() + state.private_keys.len() + state.public_keys.len()
    }

    /// Deletes everything registered under `alias`.
    pub fn remove(&self, alias: &KeyAlias) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.secrets.remove(alias);
        state.private_keys.remove(alias);
        state.public_keys.remove(alias);
    }

    /// Deletes only the certificate under `alias`, leaving a half pair behind.
    pub fn drop_public_key(&self, alias: &KeyAlias) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .public_keys
            .remove(alias);
    }

    fn check_generation(&self, spec: &KeyGenSpec, expected: KeyAlgorithm) -> KeyResult<()> {
        if self.fail_generation.load(Ordering::SeqCst) {
            return Err(KeyError::KeyGenerationFailed(
                "memory keystore refuses generation".to_string(),
            ));
        }
        if spec.algorithm != expected {
            return Err(KeyError::KeyGenerationFailed(format!(
                "expected {expected:?} spec, got {:?}",
                spec.algorithm
            )));
        }
        Ok(())
    }
}

impl Default for MemoryKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureStore for MemoryKeystore {
    fn secret_key(&self, alias: &KeyAlias) -> KeyResult<Option<Arc<dyn StoreSecretKey>>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .secrets
            .get(alias)
            .map(|key| Arc::clone(key) as Arc<dyn StoreSecretKey>))
    }

    fn private_key(&self, alias: &KeyAlias) -> KeyResult<Option<Arc<dyn StorePrivateKey>>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .private_keys
            .get(alias)
            .map(|key| Arc::clone(key) as Arc<dyn StorePrivateKey>))
    }

    fn public_key(&self, alias: &KeyAlias) -> KeyResult<Option<Vec<u8>>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.public_keys.get(alias).cloned())
    }

    fn generate_symmetric_key(
        &self,
        alias: &KeyAlias,
        spec: &KeyGenSpec,
    ) -> KeyResult<Arc<dyn StoreSecretKey>> {
        self.check_generation(spec, KeyAlgorithm::Aes)?;
        let len = match spec.key_length_bits {
            128 => 16,
            256 => 32,
            bits => {
                return Err(KeyError::KeyGenerationFailed(format!(
                    "unsupported AES key length {bits}"
                )))
            }
        };
        let mut key = Zeroizing::new(vec![0u8; len]);
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|err| KeyError::RandomSourceUnavailable(err.to_string()))?;
        let key = Arc::new(MemorySecretKey { key });
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .secrets
            .insert(alias.clone(), Arc::clone(&key));
        self.symmetric_generations.fetch_add(1, Ordering::SeqCst);
        Ok(key)
    }

    fn generate_key_pair(
        &self,
        alias: &KeyAlias,
        spec: &KeyGenSpec,
    ) -> KeyResult<GeneratedKeyPair> {
        self.check_generation(spec, KeyAlgorithm::Rsa)?;
        let bits = usize::try_from(spec.key_length_bits)
            .map_err(|err| KeyError::KeyGenerationFailed(err.to_string()))?;
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|err| KeyError::KeyGenerationFailed(err.to_string()))?;
        let public_key_der = RsaPublicKey::from(&private)
            .to_public_key_der()
            .map_err(|err| KeyError::KeyGenerationFailed(err.to_string()))?
            .into_vec();
        let private = Arc::new(MemoryPrivateKey { key: private });

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .private_keys
            .insert(alias.clone(), Arc::clone(&private));
        state
            .public_keys
            .insert(alias.clone(), public_key_der.clone());
        drop(state);

        self.key_pair_generations.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedKeyPair {
            private_key: private,
            public_key_der,
        })
    }
}

struct MemoryOpener {
    keystore: Arc<MemoryKeystore>,
}

impl KeystoreOpener for MemoryOpener {
    fn open(&self) -> KeyResult<Arc<dyn SecureStore>> {
        self.keystore.opens.fetch_add(1, Ordering::SeqCst);
        if !self.keystore.available.load(Ordering::SeqCst) {
            return Err(KeyError::StoreUnavailable(
                "memory keystore is locked".to_string(),
            ));
        }
        Ok(Arc::clone(&self.keystore) as Arc<dyn SecureStore>)
    }
}

// =============================================================================
// Memory Preferences
// =============================================================================

/// In-memory preference store backed by a `HashMap`.
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryPreferences {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Makes subsequent writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes through [`PreferenceStore::write`].
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of reads through [`PreferenceStore::read`].
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Current value under `name`, bypassing the counters.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Overwrites `name` directly, bypassing the counters (e.g. to corrupt a record).
    pub fn set_value(&self, name: &str, value: &str) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
    }
}

impl Default for MemoryPreferences {
    fn default() -> Self {
        Self::new()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn read(&self, name: &str) -> KeyResult<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.value(name))
    }

    fn write(&self, name: &str, value: &str) -> KeyResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KeyError::PersistenceFailed(
                "memory preferences refuse writes".to_string(),
            ));
        }
        self.set_value(name, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Memory Platform Bundle
// =============================================================================

/// Both in-memory collaborators, shared across simulated app launches.
#[derive(Clone, Default)]
pub struct MemoryPlatform {
    /// In-memory secure store.
    pub keystore: Arc<MemoryKeystore>,
    /// In-memory preferences.
    pub preferences: Arc<MemoryPreferences>,
}

impl MemoryPlatform {
    /// Creates a fresh platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A new lazily opened handle over the keystore, as a fresh process would create.
    #[must_use]
    pub fn shared_keystore(&self) -> Arc<SharedKeystore> {
        Arc::new(SharedKeystore::new(self.keystore.opener()))
    }

    /// The preferences as a trait object.
    #[must_use]
    pub fn preference_store(&self) -> Arc<dyn PreferenceStore> {
        Arc::clone(&self.preferences) as Arc<dyn PreferenceStore>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataKeyConfig;

    #[test]
    fn test_secret_key_round_trip() {
        let keystore = MemoryKeystore::new();
        let alias = KeyAlias::new("aes");
        let key = keystore
            .generate_symmetric_key(&alias, &KeyGenSpec::symmetric(&DataKeyConfig::default()))
            .expect("generate");
        let ciphertext = key.encrypt(b"hello, world!").expect("encrypt");
        assert_ne!(&ciphertext[NONCE_LEN..], b"hello, world!");
        assert_eq!(key.decrypt(&ciphertext).expect("decrypt"), b"hello, world!");

        let again = keystore.secret_key(&alias).expect("lookup").expect("present");
        assert_eq!(again.decrypt(&ciphertext).expect("decrypt"), b"hello, world!");
    }

    #[test]
    fn test_secret_key_rejects_tampering() {
        let keystore = MemoryKeystore::new();
        let key = keystore
            .generate_symmetric_key(
                &KeyAlias::new("aes"),
                &KeyGenSpec::symmetric(&DataKeyConfig::default()),
            )
            .expect("generate");
        let mut ciphertext = key.encrypt(b"payload").expect("encrypt");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(key.decrypt(&ciphertext).is_err());
        assert!(key.decrypt(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_key_gen_algorithm_is_checked() {
        let keystore = MemoryKeystore::new();
        let config = DataKeyConfig::default();
        let result =
            keystore.generate_key_pair(&KeyAlias::new("rsa"), &KeyGenSpec::symmetric(&config));
        assert!(matches!(result, Err(KeyError::KeyGenerationFailed(_))));
        assert_eq!(keystore.key_pair_generations(), 0);
    }

    #[test]
    fn test_remove_clears_alias() {
        let keystore = MemoryKeystore::new();
        let config = DataKeyConfig {
            rsa_modulus_bits: 1024,
            ..DataKeyConfig::default()
        };
        let alias = config.asymmetric_alias.clone();
        keystore
            .generate_key_pair(&alias, &KeyGenSpec::key_pair(&config, 0))
            .expect("generate");
        assert_eq!(keystore.entry_count(), 2);
        keystore.remove(&alias);
        assert_eq!(keystore.entry_count(), 0);
        assert!(keystore.private_key(&alias).expect("lookup").is_none());
    }

    #[test]
    fn test_preferences_counters() {
        let preferences = MemoryPreferences::new();
        assert!(preferences.read("a").expect("read").is_none());
        preferences.write("a", "1").expect("write");
        preferences.set_value("a", "2");
        assert_eq!(preferences.read("a").expect("read").as_deref(), Some("2"));
        assert_eq!(preferences.read_count(), 2);
        assert_eq!(preferences.write_count(), 1);
    }

    #[test]
    fn test_preferences_thread_safety() {
        let preferences = Arc::new(MemoryPreferences::new());
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let preferences = Arc::clone(&preferences);
                std::thread::spawn(move || {
                    preferences
                        .write(&format!("key-{i}"), &format!("value-{i}"))
                        .expect("write");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(preferences.write_count(), 10);
        assert_eq!(preferences.value("key-7").as_deref(), Some("value-7"));
    }
}
