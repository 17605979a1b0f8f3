//! Per-record decrypt and reseal
//!
//! The transformer performs no store I/O. It opens a record with the
//! historical generation named in its envelope (or, for legacy records,
//! by trying every generation newest first) and seals the plaintext again
//! for the latest generation. Plaintext only lives in a `DecryptedPayload`,
//! which is wiped on every exit path.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{envelope, Sealer};
use crate::error::{Result, RotationError};
use crate::keyring::KeyRing;
use crate::record::EncryptedRecord;

/// Plaintext of one record, wiped when dropped
pub struct DecryptedPayload {
    bytes: Zeroizing<Vec<u8>>,
}

impl DecryptedPayload {
    fn new(bytes: Zeroizing<Vec<u8>>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Overwrite the plaintext now instead of waiting for drop
    pub fn scrub(&mut self) {
        self.bytes.zeroize();
    }

    pub fn is_scrubbed(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for DecryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedPayload")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Result of transforming one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transformation {
    /// Already sealed under the latest generation; the original record unchanged
    AlreadyCurrent(EncryptedRecord),
    /// Candidate record sealed under the latest generation
    Resealed {
        record: EncryptedRecord,
        /// Generation the record was opened with
        from_label: String,
    },
}

impl Transformation {
    pub fn record(&self) -> &EncryptedRecord {
        match self {
            Transformation::AlreadyCurrent(record) => record,
            Transformation::Resealed { record, .. } => record,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Transformation::AlreadyCurrent(_))
    }
}

/// Stateless re-encryption of single records
#[derive(Clone)]
pub struct Transformer {
    keyring: Arc<KeyRing>,
    sealer: Arc<dyn Sealer>,
}

impl Transformer {
    pub fn new(keyring: Arc<KeyRing>, sealer: Arc<dyn Sealer>) -> Self {
        Self { keyring, sealer }
    }

    pub fn keyring(&self) -> &KeyRing {
        &self.keyring
    }

    /// Open `record` and, unless it is already current, reseal it for the latest generation
    pub fn transform(&self, record: &EncryptedRecord) -> Result<Transformation> {
        let (label, body) = envelope::split(&record.ciphertext)
            .map_err(|e| RotationError::Decryption(format!("{}: {}", record.id, e)))?;

        let (mut payload, opened_with) = match label {
            Some(label) => (self.open_labelled(record, label, body)?, label.to_string()),
            None => self.open_legacy(record, body)?,
        };

        let latest = self.keyring.latest();
        if label == Some(latest.label.as_str()) {
            payload.scrub();
            trace!(record = %record.id, "Record already on latest generation");
            return Ok(Transformation::AlreadyCurrent(record.clone()));
        }

        let sealed = self.sealer.seal(payload.as_bytes(), latest.public_key());
        payload.scrub();
        let sealed = sealed.map_err(|e| RotationError::Encryption(format!("{}: {}", record.id, e)))?;

        let ciphertext = envelope::wrap(&latest.label, &sealed)
            .map_err(|e| RotationError::Encryption(format!("{}: {}", record.id, e)))?;

        debug!(
            record = %record.id,
            from = %opened_with,
            to = %latest.label,
            "Resealed record"
        );

        let candidate = EncryptedRecord::new(
            record.id.clone(),
            ciphertext,
            record.resource_version.clone(),
        )
        .with_labels(record.labels.clone());

        Ok(Transformation::Resealed {
            record: candidate,
            from_label: opened_with,
        })
    }

    fn open_labelled(
        &self,
        record: &EncryptedRecord,
        label: &str,
        body: &[u8],
    ) -> Result<DecryptedPayload> {
        let generation = self.keyring.resolve(label)?;
        self.sealer
            .unseal(body, generation.secret_key())
            .map(DecryptedPayload::new)
            .map_err(|e| {
                RotationError::Decryption(format!("{} with generation {}: {}", record.id, label, e))
            })
    }

    /// Trial decryption, most recent generation first
    fn open_legacy(
        &self,
        record: &EncryptedRecord,
        body: &[u8],
    ) -> Result<(DecryptedPayload, String)> {
        for generation in self.keyring.by_recency() {
            if let Ok(plaintext) = self.sealer.unseal(body, generation.secret_key()) {
                debug!(
                    record = %record.id,
                    generation = %generation.label,
                    "Opened legacy record by trial decryption"
                );
                return Ok((DecryptedPayload::new(plaintext), generation.label.clone()));
            }
        }

        Err(RotationError::Decryption(format!(
            "{}: legacy record could not be opened with any of {} generations",
            record.id,
            self.keyring.len()
        )))
    }
}
