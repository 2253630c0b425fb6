//! The data key entry point.
//!
//! [`SymmetricKeyProvider::get_key`] resolves the platform mode once and then
//! dispatches to one of two strategies:
//!
//! ```text
//! Modern:  store.secret_key(alias) ── absent ──► store.generate_symmetric_key(alias)
//!
//! Legacy:  records.load() ── present ──► verify binding ─► unwrap ─► verify key check
//!                         └─ absent ───► random key ─► public.wrap ─► records.save
//! ```
//!
//! The first successful result is memoized, and first-time creation runs
//! under a mutex (and optionally a [`CreationLock`] for other processes).

use std::sync::{Arc, Mutex, RwLock};

use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::asymmetric::AsymmetricKeyProvider;
use crate::capability::{CapabilityDetector, KeyMode};
use crate::config::{DataKeyConfig, KeyAlias};
use crate::error::{KeyError, KeyResult};
use crate::handles::{KeyPairHandle, SecretKeyHandle, SoftwareSecretKey};
use crate::keygen::{unix_now, KeyGenSpec, WrapPadding};
use crate::keystore::SharedKeystore;
use crate::lock::CreationLock;
use crate::record::WrappedKeyRecord;
use crate::traits::PreferenceStore;
use crate::wrapped_store::WrappedKeyStore;

/// One way of obtaining or creating the data key.
pub trait KeyStrategy: Send + Sync {
    /// The mode this strategy implements.
    fn mode(&self) -> KeyMode;

    /// Returns the existing key or creates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the key can neither be recovered nor created.
    fn get_or_create(&self) -> KeyResult<SecretKeyHandle>;
}

/// Keeps the key inside the secure store.
pub struct InStoreStrategy {
    keystore: Arc<SharedKeystore>,
    alias: KeyAlias,
    spec: KeyGenSpec,
}

impl InStoreStrategy {
    /// Creates the strategy for the configured symmetric alias.
    #[must_use]
    pub fn new(keystore: Arc<SharedKeystore>, config: &DataKeyConfig) -> Self {
        Self {
            keystore,
            alias: config.symmetric_alias.clone(),
            spec: KeyGenSpec::symmetric(config),
        }
    }
}

impl KeyStrategy for InStoreStrategy {
    fn mode(&self) -> KeyMode {
        KeyMode::Modern
    }

    fn get_or_create(&self) -> KeyResult<SecretKeyHandle> {
        let store = self.keystore.store()?;
        if let Some(key) = store.secret_key(&self.alias)? {
            tracing::debug!(alias = %self.alias, "found in-store data key");
            return Ok(SecretKeyHandle::StoreResident {
                alias: self.alias.clone(),
                key,
            });
        }
        let key = store
            .generate_symmetric_key(&self.alias, &self.spec)
            .map_err(|err| match err {
                KeyError::StoreUnavailable(_) | KeyError::KeyGenerationFailed(_) => err,
                other => KeyError::KeyGenerationFailed(other.to_string()),
            })?;
        tracing::info!(
            alias = %self.alias,
            bits = self.spec.key_length_bits,
            "generated in-store data key"
        );
        Ok(SecretKeyHandle::StoreResident {
            alias: self.alias.clone(),
            key,
        })
    }
}

/// Generates the key in software and persists it wrapped under the store's RSA pair.
pub struct WrappedKeyStrategy {
    asymmetric: AsymmetricKeyProvider,
    records: WrappedKeyStore,
    padding: WrapPadding,
    key_len: usize,
}

impl WrappedKeyStrategy {
    /// Creates the strategy from its collaborators.
    #[must_use]
    pub fn new(
        asymmetric: AsymmetricKeyProvider,
        records: WrappedKeyStore,
        config: &DataKeyConfig,
    ) -> Self {
        Self {
            asymmetric,
            records,
            padding: config.wrap_padding,
            key_len: config.legacy_key_len(),
        }
    }

    fn recover(&self, record: &WrappedKeyRecord) -> KeyResult<SecretKeyHandle> {
        let pair = self.asymmetric.existing_key_pair()?.ok_or_else(|| {
            tracing::warn!(
                alias = %self.asymmetric.alias(),
                "wrapped key record without wrapping pair"
            );
            KeyError::StaleRecord(format!(
                "no key pair under {} for record {}",
                self.asymmetric.alias(),
                record.fingerprint_hex()
            ))
        })?;
        if record.is_unversioned() {
            return self.recover_unversioned(&pair, record);
        }
        if let Err(stale) = record.verify_binding(pair.public_key()) {
            return Err(self.binding_mismatch(&pair, record, stale));
        }
        let raw = self
            .unwrap_sized(&pair, record)
            .inspect_err(|err| tracing::warn!(%err, "wrapped key record does not unwrap"))?;
        record
            .verify_key(&raw)
            .inspect_err(|err| tracing::warn!(%err, "wrapped key record is corrupt"))?;
        tracing::debug!(created_at = record.created_at(), "unwrapped data key");
        Ok(software_key(raw))
    }

    /// Bare ciphertexts from older releases have no binding or key check, so
    /// only the modulus and key lengths guard against a wrong key.
    fn recover_unversioned(
        &self,
        pair: &KeyPairHandle,
        record: &WrappedKeyRecord,
    ) -> KeyResult<SecretKeyHandle> {
        let modulus_len = pair.public_key().modulus_len();
        if record.wrapped_key().len() != modulus_len {
            tracing::warn!(
                len = record.wrapped_key().len(),
                modulus_len,
                "unversioned record does not match the wrapping pair"
            );
            return Err(KeyError::CorruptRecord(format!(
                "{}-byte ciphertext under a {modulus_len}-byte modulus",
                record.wrapped_key().len()
            )));
        }
        let raw = self
            .unwrap_sized(pair, record)
            .inspect_err(|err| tracing::warn!(%err, "unversioned record does not unwrap"))?;
        tracing::info!(record = self.records.name(), "unwrapped data key from unversioned record");
        Ok(software_key(raw))
    }

    /// Only a damaged fingerprint still unwraps under the current pair to a
    /// key that passes the check; a regenerated pair does not.
    fn binding_mismatch(
        &self,
        pair: &KeyPairHandle,
        record: &WrappedKeyRecord,
        stale: KeyError,
    ) -> KeyError {
        let unwrapped = self
            .unwrap_sized(pair, record)
            .and_then(|raw| record.verify_key(&raw));
        match unwrapped {
            Ok(()) => {
                tracing::warn!("wrapped key record has a damaged fingerprint");
                KeyError::CorruptRecord(format!(
                    "fingerprint {} is damaged, key still unwraps under {}",
                    record.fingerprint_hex(),
                    hex::encode(pair.public_key().fingerprint())
                ))
            }
            Err(err @ (KeyError::StoreUnavailable(_) | KeyError::Store(_))) => err,
            Err(_) => {
                tracing::warn!(err = %stale, "wrapped key record is stale");
                stale
            }
        }
    }

    fn unwrap_sized(
        &self,
        pair: &KeyPairHandle,
        record: &WrappedKeyRecord,
    ) -> KeyResult<Zeroizing<Vec<u8>>> {
        let raw = pair
            .private_key()
            .unwrap(record.padding(), record.wrapped_key())?;
        if raw.len() != self.key_len {
            return Err(KeyError::CorruptRecord(format!(
                "unwrapped {} bytes, expected {}",
                raw.len(),
                self.key_len
            )));
        }
        Ok(raw)
    }

    fn create(&self) -> KeyResult<SecretKeyHandle> {
        let raw = random_key(self.key_len)?;
        let public = self.asymmetric.public_key()?;
        let wrapped = public.wrap(self.padding, &raw)?;
        let record = WrappedKeyRecord::new(wrapped, self.padding, &public, &raw, unix_now());
        self.records.save(&record)?;
        tracing::info!(
            record = self.records.name(),
            fingerprint = %record.fingerprint_hex(),
            "generated and wrapped data key"
        );
        Ok(software_key(raw))
    }
}

impl KeyStrategy for WrappedKeyStrategy {
    fn mode(&self) -> KeyMode {
        KeyMode::Legacy
    }

    fn get_or_create(&self) -> KeyResult<SecretKeyHandle> {
        match self.records.load()? {
            Some(record) => self.recover(&record),
            None => self.create(),
        }
    }
}

fn software_key(raw: Zeroizing<Vec<u8>>) -> SecretKeyHandle {
    SecretKeyHandle::Software(Arc::new(SoftwareSecretKey::from_bytes(raw)))
}

fn random_key(len: usize) -> KeyResult<Zeroizing<Vec<u8>>> {
    let mut key = Zeroizing::new(vec![0u8; len]);
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|err| KeyError::RandomSourceUnavailable(err.to_string()))?;
    Ok(key)
}

/// Hands out the application's data key.
pub struct SymmetricKeyProvider {
    strategy: Box<dyn KeyStrategy>,
    established: RwLock<Option<SecretKeyHandle>>,
    creation: Mutex<()>,
    creation_lock: Option<CreationLock>,
}

impl SymmetricKeyProvider {
    /// Wires up the strategy for the mode `detector` reports (or the configured override).
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: &DataKeyConfig,
        detector: &dyn CapabilityDetector,
        keystore: Arc<SharedKeystore>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> KeyResult<Self> {
        config.validate()?;
        let mode = KeyMode::resolve(config, detector);
        tracing::debug!(%mode, "resolved data key mode");
        let strategy: Box<dyn KeyStrategy> = match mode {
            KeyMode::Modern => Box::new(InStoreStrategy::new(keystore, config)),
            KeyMode::Legacy => Box::new(WrappedKeyStrategy::new(
                AsymmetricKeyProvider::new(keystore, config),
                WrappedKeyStore::new(preferences, config.record_name.clone()),
                config,
            )),
        };
        Ok(Self::with_strategy(strategy))
    }

    /// Uses `strategy` directly.
    #[must_use]
    pub fn with_strategy(strategy: Box<dyn KeyStrategy>) -> Self {
        Self {
            strategy,
            established: RwLock::new(None),
            creation: Mutex::new(()),
            creation_lock: None,
        }
    }

    /// Also holds `lock` while the key is first established.
    #[must_use]
    pub fn with_creation_lock(mut self, lock: CreationLock) -> Self {
        self.creation_lock = Some(lock);
        self
    }

    /// The mode resolved at construction.
    #[must_use]
    pub fn mode(&self) -> KeyMode {
        self.strategy.mode()
    }

    /// Returns the data key, establishing it on first use.
    ///
    /// Failures are returned as-is and never retried; a later call starts over.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be recovered or created.
    pub fn get_key(&self) -> KeyResult<SecretKeyHandle> {
        if let Some(key) = self.established()? {
            return Ok(key);
        }

        let _creation = self
            .creation
            .lock()
            .map_err(|_| KeyError::Lock("creation mutex poisoned".to_string()))?;
        if let Some(key) = self.established()? {
            return Ok(key);
        }

        let key = match &self.creation_lock {
            Some(lock) => lock.with_lock(|| self.strategy.get_or_create())?,
            None => self.strategy.get_or_create()?,
        };
        *self
            .established
            .write()
            .map_err(|_| KeyError::Lock("established key lock poisoned".to_string()))? =
            Some(key.clone());
        Ok(key)
    }

    fn established(&self) -> KeyResult<Option<SecretKeyHandle>> {
        Ok(self
            .established
            .read()
            .map_err(|_| KeyError::Lock("established key lock poisoned".to_string()))?
            .clone())
    }
}
