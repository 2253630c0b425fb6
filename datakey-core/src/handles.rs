//! Handles to the data key and the wrapping pair.

use std::fmt;
use std::sync::Arc;

use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPublicKey};
use secrecy::{ExposeSecret, SecretSlice};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::capability::KeyMode;
use crate::config::KeyAlias;
use crate::error::{KeyError, KeyResult};
use crate::keygen::WrapPadding;
use crate::traits::{StorePrivateKey, StoreSecretKey};

/// Symmetric key material reconstructed in process memory (legacy mode).
///
/// The bytes are zeroized on drop and redacted from `Debug`.
pub struct SoftwareSecretKey {
    material: SecretSlice<u8>,
}

impl SoftwareSecretKey {
    pub(crate) fn from_bytes(mut bytes: Zeroizing<Vec<u8>>) -> Self {
        Self {
            material: SecretSlice::from(std::mem::take(&mut *bytes)),
        }
    }

    /// Raw key bytes. Treat as sensitive; never persist or log them.
    #[must_use]
    pub fn expose_raw(&self) -> &[u8] {
        self.material.expose_secret()
    }

    /// Key length in bits.
    #[must_use]
    pub fn len_bits(&self) -> usize {
        self.expose_raw().len() * 8
    }
}

impl fmt::Debug for SoftwareSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareSecretKey")
            .field("len_bits", &self.len_bits())
            .finish_non_exhaustive()
    }
}

/// The application's data key.
#[derive(Clone)]
pub enum SecretKeyHandle {
    /// Held inside the secure store; operations run there.
    StoreResident {
        /// Alias the key is registered under.
        alias: KeyAlias,
        /// Store-side handle.
        key: Arc<dyn StoreSecretKey>,
    },
    /// Unwrapped into process memory.
    Software(Arc<SoftwareSecretKey>),
}

impl SecretKeyHandle {
    /// The mode that produced this handle.
    #[must_use]
    pub const fn mode(&self) -> KeyMode {
        match self {
            Self::StoreResident { .. } => KeyMode::Modern,
            Self::Software(_) => KeyMode::Legacy,
        }
    }

    /// The store-side key, for store-resident handles.
    #[must_use]
    pub fn store_key(&self) -> Option<&Arc<dyn StoreSecretKey>> {
        match self {
            Self::StoreResident { key, .. } => Some(key),
            Self::Software(_) => None,
        }
    }

    /// The in-memory key, for software handles.
    #[must_use]
    pub fn software_key(&self) -> Option<&SoftwareSecretKey> {
        match self {
            Self::StoreResident { .. } => None,
            Self::Software(key) => Some(key),
        }
    }
}

impl fmt::Debug for SecretKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreResident { alias, .. } => f
                .debug_struct("StoreResident")
                .field("alias", alias)
                .finish_non_exhaustive(),
            Self::Software(key) => f.debug_tuple("Software").field(key).finish(),
        }
    }
}

/// Public half of the wrapping pair, read out of the store's certificate.
#[derive(Clone)]
pub struct PublicKeyHandle {
    alias: KeyAlias,
    key: RsaPublicKey,
    der: Vec<u8>,
    fingerprint: [u8; 32],
}

impl PublicKeyHandle {
    /// Parses a `SubjectPublicKeyInfo` DER blob returned by the store.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Store`] if the blob is not an RSA public key.
    pub fn from_der(alias: KeyAlias, der: Vec<u8>) -> KeyResult<Self> {
        let key = RsaPublicKey::from_public_key_der(&der).map_err(|err| {
            KeyError::Store(format!("malformed public key under {alias}: {err}"))
        })?;
        let fingerprint = Sha256::digest(&der).into();
        Ok(Self {
            alias,
            key,
            der,
            fingerprint,
        })
    }

    /// Alias of the pair.
    #[must_use]
    pub const fn alias(&self) -> &KeyAlias {
        &self.alias
    }

    /// The `SubjectPublicKeyInfo` DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// SHA-256 of the DER encoding; identifies the pair a record was wrapped under.
    #[must_use]
    pub const fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    /// Modulus length in bytes.
    #[must_use]
    pub fn modulus_len(&self) -> usize {
        self.key.size()
    }

    /// RSA-encrypts `raw` for persistence.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::WrapFailed`] if `raw` does not fit the padding or encryption fails.
    pub fn wrap(&self, padding: WrapPadding, raw: &[u8]) -> KeyResult<Vec<u8>> {
        let max = padding.max_message_len(self.modulus_len());
        if raw.len() > max {
            return Err(KeyError::WrapFailed(format!(
                "{} bytes exceed the {max}-byte limit of {padding:?} under {}",
                raw.len(),
                self.alias
            )));
        }
        let wrapped = match padding {
            WrapPadding::Pkcs1v15 => self.key.encrypt(&mut OsRng, Pkcs1v15Encrypt, raw),
            WrapPadding::OaepSha256 => self.key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), raw),
        };
        wrapped.map_err(|err| KeyError::WrapFailed(err.to_string()))
    }
}

impl fmt::Debug for PublicKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyHandle")
            .field("alias", &self.alias)
            .field("fingerprint", &hex::encode(self.fingerprint))
            .finish_non_exhaustive()
    }
}

/// Private half of the wrapping pair. The key itself stays in the store.
#[derive(Clone)]
pub struct PrivateKeyHandle {
    alias: KeyAlias,
    key: Arc<dyn StorePrivateKey>,
}

impl PrivateKeyHandle {
    /// Wraps a store-side private key.
    #[must_use]
    pub fn new(alias: KeyAlias, key: Arc<dyn StorePrivateKey>) -> Self {
        Self { alias, key }
    }

    /// Alias of the pair.
    #[must_use]
    pub const fn alias(&self) -> &KeyAlias {
        &self.alias
    }

    /// Recovers raw key bytes wrapped by [`PublicKeyHandle::wrap`].
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::UnwrapFailed`] on any cipher failure; store
    /// availability errors pass through unchanged.
    pub fn unwrap(&self, padding: WrapPadding, wrapped: &[u8]) -> KeyResult<Zeroizing<Vec<u8>>> {
        match self.key.decrypt(padding, wrapped) {
            Ok(raw) => Ok(Zeroizing::new(raw)),
            Err(
                err @ (KeyError::StoreUnavailable(_)
                | KeyError::Store(_)
                | KeyError::UnwrapFailed(_)),
            ) => Err(err),
            Err(other) => Err(KeyError::UnwrapFailed(other.to_string())),
        }
    }
}

impl fmt::Debug for PrivateKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyHandle")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

/// Both halves of the wrapping pair.
#[derive(Debug, Clone)]
pub struct KeyPairHandle {
    private: PrivateKeyHandle,
    public: PublicKeyHandle,
}

impl KeyPairHandle {
    /// Pairs up the two halves.
    #[must_use]
    pub const fn new(private: PrivateKeyHandle, public: PublicKeyHandle) -> Self {
        Self { private, public }
    }

    /// The private half.
    #[must_use]
    pub const fn private_key(&self) -> &PrivateKeyHandle {
        &self.private
    }

    /// The public half.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKeyHandle {
        &self.public
    }
}
