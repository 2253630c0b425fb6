//! Configuration for the data key providers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::KeyMode;
use crate::error::{KeyError, KeyResult};
use crate::keygen::WrapPadding;

/// Default alias of the in-store AES key.
pub const DEFAULT_SYMMETRIC_ALIAS: &str = "datakey.aes";

/// Default alias of the RSA wrapping pair.
pub const DEFAULT_ASYMMETRIC_ALIAS: &str = "datakey.rsa";

/// Default preference name of the wrapped key record.
pub const DEFAULT_RECORD_NAME: &str = "datakey.wrapped_key";

pub(crate) const MIN_RSA_MODULUS_BITS: u32 = 1024;
pub(crate) const MAX_RSA_MODULUS_BITS: u32 = 4096;

/// Name under which a key or key pair is registered in the secure store.
///
/// Aliases must stay stable for the lifetime of an installation; renaming one
/// orphans whatever was stored under the old name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyAlias(String);

impl KeyAlias {
    /// Creates an alias.
    #[must_use]
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    /// The alias as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyAlias {
    fn from(alias: &str) -> Self {
        Self::new(alias)
    }
}

/// Settings shared by the symmetric and asymmetric providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataKeyConfig {
    /// Alias of the in-store AES key (modern mode).
    pub symmetric_alias: KeyAlias,
    /// Alias of the RSA wrapping pair (legacy mode).
    pub asymmetric_alias: KeyAlias,
    /// Preference name the wrapped key record is persisted under.
    pub record_name: String,
    /// Length of the in-store AES key.
    pub modern_key_bits: u32,
    /// Length of the software key generated in legacy mode.
    pub legacy_key_bits: u32,
    /// RSA modulus length of the wrapping pair.
    pub rsa_modulus_bits: u32,
    /// Padding used to wrap the software key.
    pub wrap_padding: WrapPadding,
    /// Validity of the wrapping pair's certificate.
    pub validity_years: u32,
    /// Whether keys require user presence before use.
    pub require_user_presence: bool,
    /// Forces a mode regardless of what the platform reports.
    pub mode_override: Option<KeyMode>,
}

impl Default for DataKeyConfig {
    fn default() -> Self {
        Self {
            symmetric_alias: KeyAlias::new(DEFAULT_SYMMETRIC_ALIAS),
            asymmetric_alias: KeyAlias::new(DEFAULT_ASYMMETRIC_ALIAS),
            record_name: DEFAULT_RECORD_NAME.to_string(),
            modern_key_bits: 256,
            legacy_key_bits: 128,
            rsa_modulus_bits: 2048,
            wrap_padding: WrapPadding::Pkcs1v15,
            validity_years: 30,
            require_user_presence: true,
            mode_override: None,
        }
    }
}

impl DataKeyConfig {
    /// Parses and validates a JSON configuration. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidConfig`] if the JSON is malformed or fails validation.
    pub fn from_json(json: &str) -> KeyResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| KeyError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Byte length of the legacy software key.
    #[must_use]
    pub const fn legacy_key_len(&self) -> usize {
        (self.legacy_key_bits / 8) as usize
    }

    /// Checks the configuration for values the providers cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> KeyResult<()> {
        if self.symmetric_alias.as_str().is_empty() || self.asymmetric_alias.as_str().is_empty()
        {
            return Err(invalid("key aliases must not be empty"));
        }
        if self.symmetric_alias == self.asymmetric_alias {
            return Err(invalid("symmetric and asymmetric aliases must differ"));
        }
        if self.record_name.is_empty() {
            return Err(invalid("record name must not be empty"));
        }
        for (label, bits) in [
            ("modern_key_bits", self.modern_key_bits),
            ("legacy_key_bits", self.legacy_key_bits),
        ] {
            if !matches!(bits, 128 | 192 | 256) {
                return Err(invalid(format!(
                    "{label} must be 128, 192 or 256, got {bits}"
                )));
            }
        }
        if !(MIN_RSA_MODULUS_BITS..=MAX_RSA_MODULUS_BITS).contains(&self.rsa_modulus_bits)
            || self.rsa_modulus_bits % 8 != 0
        {
            return Err(invalid(format!(
                "rsa_modulus_bits must be a multiple of 8 in {MIN_RSA_MODULUS_BITS}..={MAX_RSA_MODULUS_BITS}, got {}",
                self.rsa_modulus_bits
            )));
        }
        let modulus_bytes = (self.rsa_modulus_bits / 8) as usize;
        if self.legacy_key_len() > self.wrap_padding.max_message_len(modulus_bytes) {
            return Err(invalid(format!(
                "a {}-bit key does not fit a {}-bit modulus with {:?} padding",
                self.legacy_key_bits, self.rsa_modulus_bits, self.wrap_padding
            )));
        }
        if self.validity_years == 0 {
            return Err(invalid("validity_years must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> KeyError {
    KeyError::InvalidConfig(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        DataKeyConfig::default().validate().expect("valid");
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = DataKeyConfig::from_json(
            r#"{"symmetric_alias": "AES_DEMO", "asymmetric_alias": "RSA_DEMO", "mode_override": "legacy"}"#,
        )
        .expect("parse");
        assert_eq!(config.symmetric_alias.as_str(), "AES_DEMO");
        assert_eq!(config.asymmetric_alias.as_str(), "RSA_DEMO");
        assert_eq!(config.mode_override, Some(KeyMode::Legacy));
        assert_eq!(config.record_name, DEFAULT_RECORD_NAME);
        assert_eq!(config.legacy_key_bits, 128);
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        match DataKeyConfig::from_json(r#"{"rotation_days": 30}"#) {
            Err(KeyError::InvalidConfig(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_identical_aliases_rejected() {
        let config = DataKeyConfig {
            asymmetric_alias: KeyAlias::new(DEFAULT_SYMMETRIC_ALIAS),
            ..DataKeyConfig::default()
        };
        assert!(matches!(config.validate(), Err(KeyError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_key_lengths_rejected() {
        let config = DataKeyConfig {
            legacy_key_bits: 100,
            ..DataKeyConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DataKeyConfig {
            rsa_modulus_bits: 512,
            ..DataKeyConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_must_fit_padding() {
        // 1024-bit modulus with OAEP-SHA256 leaves 62 bytes, enough for any AES key.
        let config = DataKeyConfig {
            rsa_modulus_bits: 1024,
            legacy_key_bits: 256,
            wrap_padding: WrapPadding::OaepSha256,
            ..DataKeyConfig::default()
        };
        config.validate().expect("fits");
    }
}
