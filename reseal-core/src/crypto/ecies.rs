//! Sealed-box encryption using P-256 ECDH, HKDF-SHA256 and AES-256-GCM

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use p256::ecdh::{diffie_hellman, EphemeralSecret};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{CryptoError, Sealer};

const ALGORITHM: &str = "P256-HKDF-SHA256-AES256GCM";
const PAYLOAD_VERSION: u8 = 1;
const KDF_INFO: &[u8] = b"reseal/sealed-box/v1";
const NONCE_LEN: usize = 12;

/// Sealed body: ephemeral public key, nonce and AEAD ciphertext
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedPayload {
    /// SEC1 uncompressed ephemeral public key
    pub ephemeral_public: Vec<u8>,

    /// Nonce used for encryption (12 bytes for GCM)
    pub nonce: Vec<u8>,

    /// Encrypted data with authentication tag
    pub ciphertext: Vec<u8>,

    /// Algorithm used for encryption
    pub algorithm: String,

    /// Version for future compatibility
    pub version: u8,
}

impl SealedPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        bincode::serialize(self).map_err(|e| CryptoError::Seal(format!("serialize payload: {}", e)))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        bincode::deserialize(data).map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}

/// Stateless sealer for P-256 key pairs
#[derive(Debug, Default, Clone, Copy)]
pub struct EcdhSealer;

impl EcdhSealer {
    pub fn new() -> Self {
        Self
    }

    fn derive_key(
        shared_secret: &[u8],
        ephemeral_public: &[u8],
        recipient_public: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(ephemeral_public), shared_secret);

        let mut info = Vec::with_capacity(KDF_INFO.len() + recipient_public.len());
        info.extend_from_slice(KDF_INFO);
        info.extend_from_slice(recipient_public);

        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(&info, okm.as_mut_slice())
            .map_err(|e| CryptoError::InvalidKey(format!("HKDF expand: {}", e)))?;
        Ok(okm)
    }
}

impl Sealer for EcdhSealer {
    fn seal(&self, plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let ephemeral_public = ephemeral.public_key().to_encoded_point(false);
        let recipient_point = recipient.to_encoded_point(false);

        let shared = ephemeral.diffie_hellman(recipient);
        let key = Self::derive_key(
            shared.raw_secret_bytes().as_slice(),
            ephemeral_public.as_bytes(),
            recipient_point.as_bytes(),
        )?;

        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::Seal(e.to_string()))?;

        SealedPayload {
            ephemeral_public: ephemeral_public.as_bytes().to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
            algorithm: ALGORITHM.to_string(),
            version: PAYLOAD_VERSION,
        }
        .to_bytes()
    }

    fn unseal(&self, sealed: &[u8], key: &SecretKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let payload = SealedPayload::from_bytes(sealed)?;

        if payload.algorithm != ALGORITHM {
            return Err(CryptoError::Malformed(format!(
                "unsupported algorithm: {}",
                payload.algorithm
            )));
        }

        if payload.nonce.len() != NONCE_LEN {
            return Err(CryptoError::Malformed(format!(
                "invalid nonce length: expected {}, got {}",
                NONCE_LEN,
                payload.nonce.len()
            )));
        }

        let ephemeral_public = PublicKey::from_sec1_bytes(&payload.ephemeral_public)
            .map_err(|_| CryptoError::Malformed("invalid ephemeral public key".to_string()))?;
        let recipient_point = key.public_key().to_encoded_point(false);

        let shared = diffie_hellman(key.to_nonzero_scalar(), ephemeral_public.as_affine());
        let derived = Self::derive_key(
            shared.raw_secret_bytes().as_slice(),
            &payload.ephemeral_public,
            recipient_point.as_bytes(),
        )?;

        let cipher = Aes256Gcm::new_from_slice(derived.as_slice())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let nonce = Nonce::from_slice(&payload.nonce);

        cipher
            .decrypt(nonce, payload.ciphertext.as_ref())
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::Unseal("authentication failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal_roundtrip() {
        let sealer = EcdhSealer::new();
        let key = SecretKey::random(&mut OsRng);
        let plaintext = b"postgres://app:hunter2@db:5432/app";

        let sealed = sealer.seal(plaintext, &key.public_key()).unwrap();
        assert_ne!(sealed.as_slice(), plaintext.as_slice());

        let opened = sealer.unseal(&sealed, &key).unwrap();
        assert_eq!(opened.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn test_same_plaintext_produces_different_ciphertext() {
        let sealer = EcdhSealer::new();
        let key = SecretKey::random(&mut OsRng);

        let a = sealer.seal(b"same", &key.public_key()).unwrap();
        let b = sealer.seal(b"same", &key.public_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unseal_with_wrong_key_fails() {
        let sealer = EcdhSealer::new();
        let right = SecretKey::random(&mut OsRng);
        let wrong = SecretKey::random(&mut OsRng);

        let sealed = sealer.seal(b"secret", &right.public_key()).unwrap();
        assert!(matches!(
            sealer.unseal(&sealed, &wrong),
            Err(CryptoError::Unseal(_))
        ));
    }

    #[test]
    fn test_unseal_rejects_garbage() {
        let sealer = EcdhSealer::new();
        let key = SecretKey::random(&mut OsRng);
        assert!(sealer.unseal(b"not a payload", &key).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let sealer = EcdhSealer::new();
        let key = SecretKey::random(&mut OsRng);

        let sealed = sealer.seal(b"integrity matters", &key.public_key()).unwrap();
        let mut payload = SealedPayload::from_bytes(&sealed).unwrap();
        payload.ciphertext[0] ^= 0xFF;
        let tampered = payload.to_bytes().unwrap();

        assert!(sealer.unseal(&tampered, &key).is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let sealer = EcdhSealer::new();
        let key = SecretKey::random(&mut OsRng);

        let sealed = sealer.seal(b"", &key.public_key()).unwrap();
        assert!(sealer.unseal(&sealed, &key).unwrap().is_empty());
    }
}
