//! Common test utilities shared across integration tests.

use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use datakey_core::memory::MemoryPlatform;
use datakey_core::{
    CapabilityDetector, DataKeyConfig, SecretKeyHandle, SymmetricKeyProvider,
};
use rand::{rngs::OsRng, RngCore};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const NONCE_LEN: usize = 12;

/// Installs a test subscriber honouring `RUST_LOG`, `warn` by default.
#[allow(dead_code, reason = "used in tests")]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Defaults with a small modulus; 2048-bit generation is slow in debug builds.
#[allow(dead_code, reason = "used in tests")]
pub fn test_config() -> DataKeyConfig {
    DataKeyConfig {
        rsa_modulus_bits: 1024,
        ..DataKeyConfig::default()
    }
}

/// A provider as a freshly launched process would build it over `platform`.
#[allow(dead_code, reason = "used in tests")]
pub fn launch(
    platform: &MemoryPlatform,
    config: &DataKeyConfig,
    detector: &dyn CapabilityDetector,
) -> SymmetricKeyProvider {
    SymmetricKeyProvider::new(
        config,
        detector,
        platform.shared_keystore(),
        platform.preference_store(),
    )
    .expect("provider")
}

/// Encrypts an application payload under the data key.
#[allow(dead_code, reason = "used in tests")]
pub fn encrypt_payload(key: &SecretKeyHandle, plaintext: &[u8]) -> Vec<u8> {
    if let Some(store_key) = key.store_key() {
        return store_key.encrypt(plaintext).expect("store encrypt");
    }
    let raw = key.software_key().expect("software key").expose_raw();
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = match raw.len() {
        16 => Aes128Gcm::new_from_slice(raw)
            .expect("aes-128 key")
            .encrypt(Nonce::from_slice(&nonce), plaintext),
        _ => Aes256Gcm::new_from_slice(raw)
            .expect("aes-256 key")
            .encrypt(Nonce::from_slice(&nonce), plaintext),
    }
    .expect("encrypt");
    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypts a payload produced by [`encrypt_payload`]; `None` if authentication fails.
#[allow(dead_code, reason = "used in tests")]
pub fn decrypt_payload(key: &SecretKeyHandle, ciphertext: &[u8]) -> Option<Vec<u8>> {
    if let Some(store_key) = key.store_key() {
        return store_key.decrypt(ciphertext).ok();
    }
    let raw = key.software_key().expect("software key").expose_raw();
    let (nonce, payload) = ciphertext.split_at(NONCE_LEN);
    let plaintext = match raw.len() {
        16 => Aes128Gcm::new_from_slice(raw)
            .expect("aes-128 key")
            .decrypt(Nonce::from_slice(nonce), payload),
        _ => Aes256Gcm::new_from_slice(raw)
            .expect("aes-256 key")
            .decrypt(Nonce::from_slice(nonce), payload),
    };
    plaintext.ok()
}

/// A fresh path under the system temp directory; not created.
#[allow(dead_code, reason = "used in tests")]
pub fn temp_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("datakey-test-{}", Uuid::new_v4()));
    path
}
