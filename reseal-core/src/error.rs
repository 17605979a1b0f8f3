//! Error taxonomy for the re-encryption pipeline
//!
//! Errors fall into three classes:
//! - per-record errors that skip the record (`UnknownKeyLabel`, `Decryption`, ...)
//! - retryable store errors (`Conflict`, `TransientStore`)
//! - run-level errors that abort the whole job (`NoUsableKeys`, `FatalAuth`)

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::outcome::JobSummary;
use crate::record::RecordId;

/// Errors produced by the rotation pipeline
#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("Key material could not be parsed: {0}")]
    KeyParse(String),

    #[error("No usable key generations in key material ({skipped} entries skipped)")]
    NoUsableKeys { skipped: usize },

    #[error("Unknown key label: {0}")]
    UnknownKeyLabel(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Version conflict on {id}: expected {expected}")]
    Conflict { id: RecordId, expected: String },

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Permission denied by store: {0}")]
    FatalAuth(String),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Invalid candidate record {id}: {reason}")]
    InvalidRecord { id: RecordId, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Run aborted ({kind}): {reason}")]
    RunAborted {
        /// Kind of the error that stopped the run
        kind: ErrorKind,
        reason: String,
        summary: Box<JobSummary>,
    },
}

impl RotationError {
    /// Discriminant used in outcomes, events and reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            RotationError::KeyParse(_) => ErrorKind::KeyParse,
            RotationError::NoUsableKeys { .. } => ErrorKind::NoUsableKeys,
            RotationError::UnknownKeyLabel(_) => ErrorKind::UnknownKeyLabel,
            RotationError::Decryption(_) => ErrorKind::Decryption,
            RotationError::Encryption(_) => ErrorKind::Encryption,
            RotationError::Conflict { .. } => ErrorKind::Conflict,
            RotationError::TransientStore(_) => ErrorKind::TransientStore,
            RotationError::FatalAuth(_) => ErrorKind::FatalAuth,
            RotationError::NotFound(_) => ErrorKind::NotFound,
            RotationError::InvalidRecord { .. } => ErrorKind::InvalidRecord,
            RotationError::Config(_) => ErrorKind::Config,
            RotationError::RunAborted { .. } => ErrorKind::Aborted,
        }
    }

    /// Whether the per-record pipeline should be re-run
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RotationError::Conflict { .. } | RotationError::TransientStore(_)
        )
    }

    /// Whether the error must abort the entire run
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            RotationError::FatalAuth(_) | RotationError::NoUsableKeys { .. }
        )
    }

    /// Whether the record should be skipped with a warning
    pub fn is_record_skip(&self) -> bool {
        matches!(
            self,
            RotationError::KeyParse(_)
                | RotationError::UnknownKeyLabel(_)
                | RotationError::Decryption(_)
                | RotationError::Encryption(_)
                | RotationError::NotFound(_)
                | RotationError::InvalidRecord { .. }
        )
    }

    /// Partial summary attached to an aborted run
    pub fn summary(&self) -> Option<&JobSummary> {
        match self {
            RotationError::RunAborted { summary, .. } => Some(summary),
            _ => None,
        }
    }
}

/// Serializable error discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    KeyParse,
    NoUsableKeys,
    UnknownKeyLabel,
    Decryption,
    Encryption,
    Conflict,
    TransientStore,
    FatalAuth,
    NotFound,
    InvalidRecord,
    Config,
    Aborted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::KeyParse => "KeyParseError",
            ErrorKind::NoUsableKeys => "NoUsableKeysError",
            ErrorKind::UnknownKeyLabel => "UnknownKeyLabelError",
            ErrorKind::Decryption => "DecryptionError",
            ErrorKind::Encryption => "EncryptionError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::TransientStore => "TransientStoreError",
            ErrorKind::FatalAuth => "FatalAuthError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidRecord => "InvalidRecord",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Result alias for the pipeline
pub type Result<T> = std::result::Result<T, RotationError>;
