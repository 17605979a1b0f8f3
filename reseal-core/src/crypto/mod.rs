//! Seal/unseal capability
//!
//! This module provides:
//! - The `Sealer` trait consumed by the transformer
//! - A P-256 ECDH + HKDF-SHA256 + AES-256-GCM sealed-box implementation
//! - The key-label envelope wrapped around every sealed body

pub mod ecies;
pub mod envelope;

pub use ecies::{EcdhSealer, SealedPayload};
pub use p256::{PublicKey, SecretKey};

use zeroize::Zeroizing;

/// Seal/unseal errors
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Malformed sealed payload: {0}")]
    Malformed(String),

    #[error("Seal failed: {0}")]
    Seal(String),

    #[error("Unseal failed: {0}")]
    Unseal(String),
}

/// Asymmetric seal/unseal capability
///
/// Implementations must return plaintext inside `Zeroizing` so the
/// buffer is wiped when the caller drops it.
pub trait Sealer: Send + Sync {
    fn seal(&self, plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError>;

    fn unseal(&self, sealed: &[u8], key: &SecretKey) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}
