//! Key ring of labelled key generations
//!
//! The ring is loaded once per run from an opaque key-material blob and
//! is read-only afterwards. Individual malformed entries are skipped with
//! a warning; only a blob with zero usable entries fails the load.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use p256::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{Result, RotationError};

/// One labelled key pair
pub struct KeyGeneration {
    pub label: String,
    pub created_at: DateTime<Utc>,
    secret: SecretKey,
    public: PublicKey,
}

impl KeyGeneration {
    pub fn new(label: impl Into<String>, secret: SecretKey, created_at: DateTime<Utc>) -> Self {
        let public = secret.public_key();
        Self {
            label: label.into(),
            created_at,
            secret,
            public,
        }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Total order used to pick the latest generation
    fn recency_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.label.as_str())
    }
}

impl fmt::Debug for KeyGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGeneration")
            .field("label", &self.label)
            .field("created_at", &self.created_at)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Wire form of one key-material entry
#[derive(Serialize, Deserialize)]
pub struct KeyMaterialEntry {
    pub label: String,
    /// Hex-encoded 32-byte P-256 scalar
    pub private_key: String,
    pub created_at: DateTime<Utc>,
}

impl KeyMaterialEntry {
    /// Create an entry holding a freshly generated key
    pub fn generate(label: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let secret = SecretKey::random(&mut aes_gcm::aead::OsRng);
        Self {
            label: label.into(),
            private_key: hex::encode(secret.to_bytes()),
            created_at,
        }
    }
}

impl fmt::Debug for KeyMaterialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterialEntry")
            .field("label", &self.label)
            .field("created_at", &self.created_at)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for KeyMaterialEntry {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.private_key.zeroize();
    }
}

/// Encode entries into a key-material blob
pub fn encode_key_material(entries: &[KeyMaterialEntry]) -> Result<Zeroizing<Vec<u8>>> {
    #[derive(Serialize)]
    struct Blob<'a> {
        keys: &'a [KeyMaterialEntry],
    }

    serde_json::to_vec(&Blob { keys: entries })
        .map(Zeroizing::new)
        .map_err(|e| RotationError::KeyParse(format!("encode key material: {}", e)))
}

/// Top-level key-material document with entries left unparsed
#[derive(Deserialize)]
struct KeyMaterialDocument<'a> {
    #[serde(borrow)]
    keys: Vec<&'a RawValue>,
}

/// Immutable snapshot of all known key generations
pub struct KeyRing {
    generations: HashMap<String, KeyGeneration>,
    latest_label: String,
    /// Labels ordered most recent first
    by_recency: Vec<String>,
}

impl KeyRing {
    /// Parse a key-material blob
    pub fn load(material: &[u8]) -> Result<Self> {
        // Entries stay borrowed from `material` until parsed into a
        // zeroizing `KeyMaterialEntry`; no other copy of a key is made.
        let document: KeyMaterialDocument<'_> = serde_json::from_slice(material).map_err(|e| {
            RotationError::KeyParse(format!("key material must be {{\"keys\": [..]}}: {}", e))
        })?;
        let entries = document.keys;

        let mut generations = Vec::with_capacity(entries.len());
        let mut skipped = 0usize;

        for (index, entry) in entries.iter().enumerate() {
            match Self::parse_entry(entry) {
                Ok(generation) => {
                    if generations
                        .iter()
                        .any(|g: &KeyGeneration| g.label == generation.label)
                    {
                        warn!(index, label = %generation.label, "Skipping duplicate key label");
                        skipped += 1;
                        continue;
                    }
                    generations.push(generation);
                }
                Err(reason) => {
                    warn!(index, %reason, "Skipping malformed key entry");
                    skipped += 1;
                }
            }
        }

        let ring = Self::from_generations(generations)
            .ok_or(RotationError::NoUsableKeys { skipped })?;

        info!(
            generations = ring.len(),
            skipped,
            latest = %ring.latest_label,
            "Loaded key ring"
        );
        Ok(ring)
    }

    /// Build a ring from already-parsed generations; `None` when empty
    pub fn from_generations(generations: Vec<KeyGeneration>) -> Option<Self> {
        let mut ordered: Vec<&KeyGeneration> = generations.iter().collect();
        ordered.sort_by(|a, b| b.recency_key().cmp(&a.recency_key()));

        let by_recency: Vec<String> = ordered.iter().map(|g| g.label.clone()).collect();
        let latest_label = by_recency.first()?.clone();

        let generations = generations
            .into_iter()
            .map(|g| (g.label.clone(), g))
            .collect();

        Some(Self {
            generations,
            latest_label,
            by_recency,
        })
    }

    fn parse_entry(entry: &RawValue) -> std::result::Result<KeyGeneration, String> {
        let raw: KeyMaterialEntry =
            serde_json::from_str(entry.get()).map_err(|e| format!("invalid entry: {}", e))?;

        let label = raw.label.trim();
        if label.is_empty() {
            return Err("empty label".to_string());
        }
        if label.len() > crate::crypto::envelope::MAX_LABEL_LEN {
            return Err(format!("label '{}' is too long", label));
        }

        let bytes = Zeroizing::new(
            hex::decode(raw.private_key.trim())
                .map_err(|e| format!("private key for '{}' is not hex: {}", label, e))?,
        );
        if bytes.len() != 32 {
            return Err(format!(
                "private key for '{}' must be 32 bytes, got {}",
                label,
                bytes.len()
            ));
        }

        let secret = SecretKey::from_slice(&bytes)
            .map_err(|_| format!("private key for '{}' is not a valid P-256 scalar", label))?;

        debug!(label, created_at = %raw.created_at, "Parsed key generation");
        Ok(KeyGeneration::new(label, secret, raw.created_at))
    }

    /// Look up a historical generation by label
    pub fn resolve(&self, label: &str) -> Result<&KeyGeneration> {
        self.generations
            .get(label)
            .ok_or_else(|| RotationError::UnknownKeyLabel(label.to_string()))
    }

    /// Generation used for all re-encryption
    pub fn latest(&self) -> &KeyGeneration {
        // latest_label is always a key of `generations`
        &self.generations[&self.latest_label]
    }

    pub fn latest_label(&self) -> &str {
        &self.latest_label
    }

    /// All generations, most recent first
    pub fn by_recency(&self) -> impl Iterator<Item = &KeyGeneration> {
        self.by_recency.iter().map(move |label| &self.generations[label])
    }

    pub fn len(&self) -> usize {
        self.generations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("labels", &self.by_recency)
            .field("latest", &self.latest_label)
            .finish()
    }
}

/// Source of the key-material blob
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn load(&self) -> Result<Zeroizing<Vec<u8>>>;
}

/// Key material read from a file on each load
#[derive(Debug, Clone)]
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl KeySource for FileKeySource {
    async fn load(&self) -> Result<Zeroizing<Vec<u8>>> {
        tokio::fs::read(&self.path).await.map(Zeroizing::new).map_err(|e| {
            RotationError::KeyParse(format!(
                "failed to read key material {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Key material held in memory
pub struct StaticKeySource {
    material: Zeroizing<Vec<u8>>,
}

impl StaticKeySource {
    pub fn new(material: impl Into<Vec<u8>>) -> Self {
        Self {
            material: Zeroizing::new(material.into()),
        }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn load(&self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(self.material.clone())
    }
}
