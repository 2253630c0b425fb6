//! Establishes a single application data key on top of the platform's secure store.
//!
//! Where the store can generate and hold a symmetric key itself (modern mode),
//! the key never leaves it. Where it can only hold RSA pairs (legacy mode), a
//! random key is generated in process, wrapped under the store-held public key
//! and persisted as a [`WrappedKeyRecord`]; later launches unwrap it again.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use datakey_core::memory::MemoryPlatform;
//! use datakey_core::{DataKeyConfig, KeyMode, PlatformVersion, SymmetricKeyProvider};
//!
//! let platform = MemoryPlatform::new();
//! let provider = SymmetricKeyProvider::new(
//!     &DataKeyConfig::default(),
//!     &PlatformVersion::new(30),
//!     platform.shared_keystore(),
//!     platform.preference_store(),
//! )?;
//! assert_eq!(provider.mode(), KeyMode::Modern);
//! let key = provider.get_key()?;
//! assert!(key.store_key().is_some());
//! # Ok::<(), datakey_core::KeyError>(())
//! ```

pub mod asymmetric;
pub use asymmetric::AsymmetricKeyProvider;

pub mod capability;
pub use capability::{CapabilityDetector, KeyMode, PlatformVersion, StaticCapability};

pub mod config;
pub use config::{DataKeyConfig, KeyAlias};

mod error;
pub use error::{KeyError, KeyResult};

pub mod fs_preferences;
pub use fs_preferences::FilePreferenceStore;

pub mod handles;
pub use handles::{KeyPairHandle, PrivateKeyHandle, PublicKeyHandle, SecretKeyHandle};

pub mod keygen;
pub use keygen::{KeyGenSpec, WrapPadding};

pub mod keystore;
pub use keystore::SharedKeystore;

pub mod lock;
pub use lock::CreationLock;

pub mod logger;

pub mod memory;

pub mod record;
pub use record::WrappedKeyRecord;

pub mod symmetric;
pub use symmetric::{KeyStrategy, SymmetricKeyProvider};

pub mod traits;

pub mod wrapped_store;
pub use wrapped_store::WrappedKeyStore;

#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("datakey_core");
