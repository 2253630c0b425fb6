//! RSA wrapping pair held in the secure store.

use std::sync::Arc;

use crate::config::{DataKeyConfig, KeyAlias};
use crate::error::{KeyError, KeyResult};
use crate::handles::{KeyPairHandle, PrivateKeyHandle, PublicKeyHandle};
use crate::keygen::{unix_now, KeyGenSpec};
use crate::keystore::SharedKeystore;

/// Guarantees an RSA pair exists under the wrapping alias, generating it on first use.
///
/// The accessors never touch store state once the pair exists.
/// [`generate_key_pair`](Self::generate_key_pair) replaces the pair, which
/// makes any record wrapped under the old one unrecoverable; such records are
/// later reported as [`KeyError::StaleRecord`].
pub struct AsymmetricKeyProvider {
    keystore: Arc<SharedKeystore>,
    config: DataKeyConfig,
}

impl AsymmetricKeyProvider {
    /// Creates a provider over `keystore`.
    #[must_use]
    pub fn new(keystore: Arc<SharedKeystore>, config: &DataKeyConfig) -> Self {
        Self {
            keystore,
            config: config.clone(),
        }
    }

    /// Alias of the wrapping pair.
    #[must_use]
    pub const fn alias(&self) -> &KeyAlias {
        &self.config.asymmetric_alias
    }

    /// The store-resident private key, generating the pair if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::StoreUnavailable`] if the store cannot be opened or
    /// [`KeyError::KeyGenerationFailed`] if generation fails.
    pub fn private_key(&self) -> KeyResult<PrivateKeyHandle> {
        let store = self.keystore.store()?;
        if let Some(key) = store.private_key(self.alias())? {
            return Ok(PrivateKeyHandle::new(self.alias().clone(), key));
        }
        Ok(self.generate_key_pair()?.private_key().clone())
    }

    /// The public key from the pair's certificate, generating the pair if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::StoreUnavailable`] if the store cannot be opened or
    /// [`KeyError::KeyGenerationFailed`] if generation fails.
    pub fn public_key(&self) -> KeyResult<PublicKeyHandle> {
        let store = self.keystore.store()?;
        if let Some(der) = store.public_key(self.alias())? {
            return PublicKeyHandle::from_der(self.alias().clone(), der);
        }
        Ok(self.generate_key_pair()?.public_key().clone())
    }

    /// Both halves if the pair exists. Never generates.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened, or [`KeyError::Store`]
    /// if only one half of the pair is present.
    pub fn existing_key_pair(&self) -> KeyResult<Option<KeyPairHandle>> {
        let store = self.keystore.store()?;
        let private = store.private_key(self.alias())?;
        let public = store.public_key(self.alias())?;
        match (private, public) {
            (Some(private), Some(der)) => Ok(Some(KeyPairHandle::new(
                PrivateKeyHandle::new(self.alias().clone(), private),
                PublicKeyHandle::from_der(self.alias().clone(), der)?,
            ))),
            (None, None) => Ok(None),
            _ => Err(KeyError::Store(format!(
                "incomplete key pair under {}",
                self.alias()
            ))),
        }
    }

    /// Generates a new pair under the alias, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::StoreUnavailable`] if the store cannot be opened or
    /// [`KeyError::KeyGenerationFailed`] if the store rejects the request.
    pub fn generate_key_pair(&self) -> KeyResult<KeyPairHandle> {
        let store = self.keystore.store()?;
        let spec = KeyGenSpec::key_pair(&self.config, unix_now());
        let generated = store
            .generate_key_pair(self.alias(), &spec)
            .map_err(|err| match err {
                KeyError::StoreUnavailable(_) | KeyError::KeyGenerationFailed(_) => err,
                other => KeyError::KeyGenerationFailed(other.to_string()),
            })?;
        let public = PublicKeyHandle::from_der(self.alias().clone(), generated.public_key_der)?;
        tracing::info!(
            alias = %self.alias(),
            bits = spec.key_length_bits,
            fingerprint = %hex::encode(public.fingerprint()),
            "generated wrapping key pair"
        );
        Ok(KeyPairHandle::new(
            PrivateKeyHandle::new(self.alias().clone(), generated.private_key),
            public,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKeystore;

    fn provider() -> (Arc<MemoryKeystore>, AsymmetricKeyProvider) {
        let keystore = Arc::new(MemoryKeystore::new());
        let config = DataKeyConfig {
            rsa_modulus_bits: 1024,
            ..DataKeyConfig::default()
        };
        let shared = Arc::new(SharedKeystore::new(keystore.opener()));
        (keystore, AsymmetricKeyProvider::new(shared, &config))
    }

    #[test]
    fn test_first_access_generates_pair() {
        let (keystore, provider) = provider();
        assert!(provider.existing_key_pair().expect("peek").is_none());

        let public = provider.public_key().expect("public");
        assert_eq!(keystore.key_pair_generations(), 1);

        let private = provider.private_key().expect("private");
        assert_eq!(keystore.key_pair_generations(), 1);
        assert_eq!(private.alias(), public.alias());
    }

    #[test]
    fn test_private_first_also_generates_once() {
        let (keystore, provider) = provider();
        provider.private_key().expect("private");
        provider.public_key().expect("public");
        assert_eq!(keystore.key_pair_generations(), 1);
    }

    #[test]
    fn test_accessors_do_not_mutate_store() {
        let (keystore, provider) = provider();
        let first = provider.public_key().expect("public");
        let entries = keystore.entry_count();
        for _ in 0..5 {
            let public = provider.public_key().expect("public");
            provider.private_key().expect("private");
            assert_eq!(public.fingerprint(), first.fingerprint());
        }
        assert_eq!(keystore.entry_count(), entries);
        assert_eq!(keystore.key_pair_generations(), 1);
    }

    #[test]
    fn test_regeneration_replaces_pair() {
        let (keystore, provider) = provider();
        let first = provider.public_key().expect("public");
        let second = provider.generate_key_pair().expect("regenerate");
        assert_ne!(first.fingerprint(), second.public_key().fingerprint());
        assert_eq!(keystore.key_pair_generations(), 2);
        let current = provider.public_key().expect("public");
        assert_eq!(current.fingerprint(), second.public_key().fingerprint());
    }

    #[test]
    fn test_generation_failure_is_typed() {
        let (keystore, provider) = provider();
        keystore.set_fail_generation(true);
        match provider.public_key() {
            Err(KeyError::KeyGenerationFailed(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unavailable_store_is_typed() {
        let (keystore, provider) = provider();
        keystore.set_available(false);
        match provider.private_key() {
            Err(KeyError::StoreUnavailable(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_half_pair_is_reported() {
        let (keystore, provider) = provider();
        provider.public_key().expect("public");
        keystore.drop_public_key(provider.alias());
        assert!(matches!(
            provider.existing_key_pair(),
            Err(KeyError::Store(_))
        ));
    }
}
