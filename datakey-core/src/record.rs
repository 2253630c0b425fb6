//! Wrapped key record persisted in legacy mode.
//!
//! The stored value is `base64(CBOR(record))`. Besides the RSA ciphertext the
//! record remembers which public key wrapped it and a short check value of
//! the raw key, so a regenerated pair or a tampered record is reported as an
//! error instead of yielding a wrong key.
//!
//! Installs from before the envelope existed stored `base64(ciphertext)` with
//! PKCS#1 v1.5 padding and nothing else. Those values still decode, as
//! unversioned records that carry neither a binding nor a key check.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::{MAX_RSA_MODULUS_BITS, MIN_RSA_MODULUS_BITS};
use crate::error::{KeyError, KeyResult};
use crate::handles::PublicKeyHandle;
use crate::keygen::WrapPadding;

const RECORD_VERSION: u32 = 1;
const UNVERSIONED: u32 = 0;
const KEY_CHECK_DOMAIN: &[u8] = b"datakey:key-check";
const KEY_CHECK_LEN: usize = 8;

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

/// The persisted, wrapped form of the legacy data key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKeyRecord {
    version: u32,
    wrapped_key: Vec<u8>,
    padding: WrapPadding,
    wrapping_key_fingerprint: Vec<u8>,
    key_check: Vec<u8>,
    created_at: u64,
}

impl WrappedKeyRecord {
    /// Builds a record for `wrapped_key`, binding it to `public` and to the raw key it wraps.
    #[must_use]
    pub fn new(
        wrapped_key: Vec<u8>,
        padding: WrapPadding,
        public: &PublicKeyHandle,
        raw_key: &[u8],
        now: u64,
    ) -> Self {
        Self {
            version: RECORD_VERSION,
            wrapped_key,
            padding,
            wrapping_key_fingerprint: public.fingerprint().to_vec(),
            key_check: key_check(raw_key).to_vec(),
            created_at: now,
        }
    }

    fn unversioned(wrapped_key: Vec<u8>) -> KeyResult<Self> {
        let min = (MIN_RSA_MODULUS_BITS / 8) as usize;
        let max = (MAX_RSA_MODULUS_BITS / 8) as usize;
        if !(min..=max).contains(&wrapped_key.len()) {
            return Err(KeyError::CorruptRecord(format!(
                "{} bytes is neither an envelope nor an RSA ciphertext",
                wrapped_key.len()
            )));
        }
        Ok(Self {
            version: UNVERSIONED,
            wrapped_key,
            padding: WrapPadding::Pkcs1v15,
            wrapping_key_fingerprint: Vec::new(),
            key_check: Vec::new(),
            created_at: 0,
        })
    }

    /// Envelope version; `0` for a bare ciphertext from an older release.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Whether this is a bare ciphertext without binding or key check.
    #[must_use]
    pub const fn is_unversioned(&self) -> bool {
        self.version == UNVERSIONED
    }

    /// RSA ciphertext of the raw key.
    #[must_use]
    pub fn wrapped_key(&self) -> &[u8] {
        &self.wrapped_key
    }

    /// Padding the key was wrapped with.
    #[must_use]
    pub const fn padding(&self) -> WrapPadding {
        self.padding
    }

    /// Creation time, seconds since the Unix epoch.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Hex fingerprint of the public key that wrapped this record.
    #[must_use]
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(&self.wrapping_key_fingerprint)
    }

    /// Encodes the record into the opaque string handed to the preference store.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::PersistenceFailed`] if serialization fails.
    pub fn encode(&self) -> KeyResult<String> {
        if self.is_unversioned() {
            return Ok(STANDARD.encode(&self.wrapped_key));
        }
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| KeyError::PersistenceFailed(err.to_string()))?;
        Ok(STANDARD.encode(bytes))
    }

    /// Decodes a stored value. ASCII whitespace (line-wrapped base64) is ignored.
    ///
    /// A value that is base64 but not an envelope is read as a bare RSA
    /// ciphertext if its length fits a supported modulus.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::CorruptRecord`] if the value cannot be decoded and
    /// [`KeyError::UnsupportedRecordVersion`] for envelopes from a newer build.
    pub fn decode(value: &str) -> KeyResult<Self> {
        let compact: String = value
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        if compact.is_empty() {
            return Err(KeyError::CorruptRecord("empty record".to_string()));
        }
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|err| KeyError::CorruptRecord(format!("base64: {err}")))?;
        let Ok(header) = ciborium::de::from_reader::<VersionHeader, _>(bytes.as_slice()) else {
            return Self::unversioned(bytes);
        };
        if header.version != RECORD_VERSION {
            return Err(KeyError::UnsupportedRecordVersion(header.version));
        }
        let record: Self = ciborium::de::from_reader(bytes.as_slice())
            .map_err(|err| KeyError::CorruptRecord(format!("envelope: {err}")))?;
        if record.wrapped_key.is_empty() {
            return Err(KeyError::CorruptRecord("empty wrapped key".to_string()));
        }
        Ok(record)
    }

    /// Checks that this record was wrapped under `public`.
    ///
    /// A damaged fingerprint fails the same way as a regenerated pair; telling
    /// the two apart needs the private key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::StaleRecord`] if the fingerprint does not match.
    pub fn verify_binding(&self, public: &PublicKeyHandle) -> KeyResult<()> {
        if bool::from(
            self.wrapping_key_fingerprint
                .as_slice()
                .ct_eq(public.fingerprint()),
        ) {
            Ok(())
        } else {
            Err(KeyError::StaleRecord(format!(
                "record wrapped under {}, store holds {}",
                self.fingerprint_hex(),
                hex::encode(public.fingerprint())
            )))
        }
    }

    /// Checks that `raw_key` is the key this record was created for.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::CorruptRecord`] on mismatch.
    pub fn verify_key(&self, raw_key: &[u8]) -> KeyResult<()> {
        if bool::from(self.key_check.as_slice().ct_eq(&key_check(raw_key))) {
            Ok(())
        } else {
            Err(KeyError::CorruptRecord(
                "unwrapped key does not match its check value".to_string(),
            ))
        }
    }
}

fn key_check(raw_key: &[u8]) -> [u8; KEY_CHECK_LEN] {
    let digest = Sha256::new()
        .chain_update(KEY_CHECK_DOMAIN)
        .chain_update(raw_key)
        .finalize();
    let mut out = [0u8; KEY_CHECK_LEN];
    out.copy_from_slice(&digest[..KEY_CHECK_LEN]);
    out
}
