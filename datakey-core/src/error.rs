//! Error types for data key establishment.

use thiserror::Error;

/// Result type for key operations.
pub type KeyResult<T> = Result<T, KeyError>;

/// Errors raised while establishing or recovering the data key.
///
/// Nothing here is retried internally. Whether to regenerate after a
/// [`KeyError::CorruptRecord`] or [`KeyError::StaleRecord`] is the caller's
/// decision, since doing so discards data protected by the previous key.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
pub enum KeyError {
    /// The secure store could not be opened or loaded.
    #[error("secure store unavailable: {0}")]
    StoreUnavailable(String),

    /// A lookup against an opened secure store failed.
    #[error("secure store error: {0}")]
    Store(String),

    /// The secure store refused to generate a key or key pair.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Encrypting the raw key under the public key failed.
    #[error("wrap failed: {0}")]
    WrapFailed(String),

    /// Decrypting the wrapped key with the private key failed.
    #[error("unwrap failed: {0}")]
    UnwrapFailed(String),

    /// The system entropy source could not be read.
    #[error("random source unavailable: {0}")]
    RandomSourceUnavailable(String),

    /// Reading or writing the wrapped key record failed.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// The persisted record could not be decoded or did not yield a valid key.
    #[error("corrupt wrapped key record: {0}")]
    CorruptRecord(String),

    /// The persisted record was wrapped under a key pair that is no longer in the store.
    ///
    /// A record naming the wrong pair is only reported as stale when the pair
    /// in the store cannot unwrap it. If it can, the fingerprint itself was
    /// damaged and the error is [`KeyError::CorruptRecord`].
    #[error("stale wrapped key record: {0}")]
    StaleRecord(String),

    /// The persisted record uses an envelope version this build cannot read.
    #[error("unsupported record version: {0}")]
    UnsupportedRecordVersion(u32),

    /// The creation lock could not be acquired.
    #[error("creation lock error: {0}")]
    Lock(String),

    /// The configuration is not usable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Unexpected `UniFFI` callback error.
    #[cfg(feature = "ffi")]
    #[error("unexpected uniffi callback error: {0}")]
    UnexpectedUniFFICallbackError(String),
}

#[cfg(feature = "ffi")]
impl From<uniffi::UnexpectedUniFFICallbackError> for KeyError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(error.reason)
    }
}

impl KeyError {
    /// Whether the error is caused by the persisted record rather than the platform.
    ///
    /// Callers that choose to recover by generating a fresh key usually key off this.
    #[must_use]
    pub const fn is_record_problem(&self) -> bool {
        matches!(
            self,
            Self::CorruptRecord(_)
                | Self::StaleRecord(_)
                | Self::UnsupportedRecordVersion(_)
                | Self::UnwrapFailed(_)
        )
    }
}
