//! Platform capability detection.
//!
//! Whether the secure store can generate and hold a symmetric key is a
//! property of the platform version, so it is evaluated once when a provider
//! is built and never re-checked.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::DataKeyConfig;

/// First Android API level whose keystore generates AES keys in-store (Android 6.0).
pub const MIN_IN_STORE_SYMMETRIC_API_LEVEL: u32 = 23;

/// How the data key is established.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum KeyMode {
    /// The key is generated inside the secure store and never leaves it.
    Modern,
    /// The key is generated in software and persisted wrapped under a store-held RSA pair.
    Legacy,
}

impl KeyMode {
    /// Asks `detector` once.
    #[must_use]
    pub fn detect(detector: &dyn CapabilityDetector) -> Self {
        if detector.supports_in_store_symmetric_generation() {
            Self::Modern
        } else {
            Self::Legacy
        }
    }

    /// The configured override if any, otherwise whatever `detector` reports.
    #[must_use]
    pub fn resolve(config: &DataKeyConfig, detector: &dyn CapabilityDetector) -> Self {
        config
            .mode_override
            .unwrap_or_else(|| Self::detect(detector))
    }
}

/// Reports whether the secure store can hold a symmetric key directly.
pub trait CapabilityDetector: Send + Sync {
    /// `true` when symmetric keys can be generated and kept inside the store.
    fn supports_in_store_symmetric_generation(&self) -> bool;
}

/// Detector keyed on the host's platform API level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformVersion {
    api_level: u32,
}

impl PlatformVersion {
    /// Wraps the API level reported by the host at startup.
    #[must_use]
    pub const fn new(api_level: u32) -> Self {
        Self { api_level }
    }

    /// The wrapped API level.
    #[must_use]
    pub const fn api_level(&self) -> u32 {
        self.api_level
    }
}

impl CapabilityDetector for PlatformVersion {
    fn supports_in_store_symmetric_generation(&self) -> bool {
        self.api_level() >= MIN_IN_STORE_SYMMETRIC_API_LEVEL
    }
}

/// Detector with a fixed answer, for hosts that know their capability up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticCapability(pub bool);

impl CapabilityDetector for StaticCapability {
    fn supports_in_store_symmetric_generation(&self) -> bool {
        self.0
    }
}
