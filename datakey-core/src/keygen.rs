//! Key generation parameters handed to the secure store.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::DataKeyConfig;

/// Average Gregorian year in seconds.
const SECONDS_PER_YEAR: u64 = 31_556_952;

/// Serial number stamped on self-signed wrapping certificates.
pub const WRAPPING_CERTIFICATE_SERIAL: u64 = 10;

/// Key algorithm requested from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum KeyAlgorithm {
    /// AES symmetric key.
    Aes,
    /// RSA key pair.
    Rsa,
}

/// Operations a generated key is approved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum KeyPurpose {
    /// Encryption only.
    Encrypt,
    /// Decryption only.
    Decrypt,
    /// Both encryption and decryption.
    EncryptDecrypt,
}

/// Padding scheme requested for a generated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum PaddingScheme {
    /// PKCS#7 block padding (symmetric keys).
    Pkcs7,
    /// RSAES-PKCS1-v1_5.
    RsaPkcs1v15,
    /// RSAES-OAEP with SHA-256.
    RsaOaepSha256,
}

/// Padding used when wrapping the software key under the RSA public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum WrapPadding {
    /// RSAES-PKCS1-v1_5, compatible with `RSA/ECB/PKCS1Padding` providers.
    #[default]
    Pkcs1v15,
    /// RSAES-OAEP with SHA-256 for both the digest and MGF1.
    OaepSha256,
}

impl WrapPadding {
    /// Largest plaintext, in bytes, this padding can wrap under a modulus of `modulus_bytes`.
    #[must_use]
    pub const fn max_message_len(self, modulus_bytes: usize) -> usize {
        match self {
            Self::Pkcs1v15 => modulus_bytes.saturating_sub(11),
            Self::OaepSha256 => modulus_bytes.saturating_sub(2 * 32 + 2),
        }
    }
}

impl From<WrapPadding> for PaddingScheme {
    fn from(padding: WrapPadding) -> Self {
        match padding {
            WrapPadding::Pkcs1v15 => Self::RsaPkcs1v15,
            WrapPadding::OaepSha256 => Self::RsaOaepSha256,
        }
    }
}

/// Certificate validity window, in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Validity {
    /// Start of the window.
    pub not_before: u64,
    /// End of the window.
    pub not_after: u64,
}

impl Validity {
    /// A window starting at `now` and lasting `years`.
    #[must_use]
    pub const fn years_from(now: u64, years: u32) -> Self {
        Self {
            not_before: now,
            not_after: now.saturating_add(SECONDS_PER_YEAR.saturating_mul(years as u64)),
        }
    }
}

/// Parameters for a key generated inside the secure store.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct KeyGenSpec {
    /// Algorithm of the key or key pair.
    pub algorithm: KeyAlgorithm,
    /// Approved operations.
    pub purpose: KeyPurpose,
    /// Whether the store must establish user presence before the key is used.
    pub require_user_presence: bool,
    /// Whether the store should insist on randomized encryption for this key.
    pub randomized_encryption: bool,
    /// Key length (AES) or modulus length (RSA) in bits.
    pub key_length_bits: u32,
    /// Padding the key will be used with.
    pub padding: PaddingScheme,
    /// Whether the key material may leave the store.
    pub exportable: bool,
    /// Certificate validity for key pairs.
    pub validity: Option<Validity>,
    /// Certificate subject for key pairs, e.g. `CN=<alias>`.
    pub subject: Option<String>,
    /// Certificate serial number for key pairs.
    pub serial: Option<u64>,
}

impl KeyGenSpec {
    /// The in-store AES key used in modern mode.
    #[must_use]
    pub fn symmetric(config: &DataKeyConfig) -> Self {
        Self {
            algorithm: KeyAlgorithm::Aes,
            purpose: KeyPurpose::EncryptDecrypt,
            require_user_presence: config.require_user_presence,
            randomized_encryption: false,
            key_length_bits: config.modern_key_bits,
            padding: PaddingScheme::Pkcs7,
            exportable: false,
            validity: None,
            subject: None,
            serial: None,
        }
    }

    /// The RSA wrapping pair used in legacy mode, valid from `now`.
    #[must_use]
    pub fn key_pair(config: &DataKeyConfig, now: u64) -> Self {
        Self {
            algorithm: KeyAlgorithm::Rsa,
            purpose: KeyPurpose::EncryptDecrypt,
            require_user_presence: config.require_user_presence,
            randomized_encryption: false,
            key_length_bits: config.rsa_modulus_bits,
            padding: config.wrap_padding.into(),
            exportable: false,
            validity: Some(Validity::years_from(now, config.validity_years)),
            subject: Some(format!("CN={}", config.asymmetric_alias)),
            serial: Some(WRAPPING_CERTIFICATE_SERIAL),
        }
    }
}

/// Seconds since the Unix epoch, or zero if the clock is before it.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_spec_is_non_exportable_aes() {
        let spec = KeyGenSpec::symmetric(&DataKeyConfig::default());
        assert_eq!(spec.algorithm, KeyAlgorithm::Aes);
        assert_eq!(spec.purpose, KeyPurpose::EncryptDecrypt);
        assert_eq!(spec.key_length_bits, 256);
        assert!(!spec.exportable);
        assert!(!spec.randomized_encryption);
        assert!(spec.require_user_presence);
        assert!(spec.validity.is_none());
    }

    #[test]
    fn test_key_pair_spec_has_long_validity() {
        let config = DataKeyConfig::default();
        let spec = KeyGenSpec::key_pair(&config, 1_000);
        let validity = spec.validity.expect("validity");
        assert_eq!(validity.not_before, 1_000);
        assert_eq!(validity.not_after, 1_000 + 30 * SECONDS_PER_YEAR);
        assert_eq!(spec.subject.as_deref(), Some("CN=datakey.rsa"));
        assert_eq!(spec.padding, PaddingScheme::RsaPkcs1v15);
        assert_eq!(spec.serial, Some(WRAPPING_CERTIFICATE_SERIAL));
    }

    #[test]
    fn test_max_message_len() {
        assert_eq!(WrapPadding::Pkcs1v15.max_message_len(256), 245);
        assert_eq!(WrapPadding::OaepSha256.max_message_len(256), 190);
        assert_eq!(WrapPadding::OaepSha256.max_message_len(40), 0);
    }

    #[test]
    fn test_validity_saturates() {
        let validity = Validity::years_from(u64::MAX - 5, 30);
        assert_eq!(validity.not_after, u64::MAX);
    }
}
