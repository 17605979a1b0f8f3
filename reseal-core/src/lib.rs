//! Reseal Core - key-ring re-encryption of sealed secret records
//!
//! This crate provides:
//! - A multi-generation key ring loaded from opaque key material
//! - Paginated scanning with a resume cursor
//! - Per-record decrypt and reseal with zeroized plaintext
//! - Optimistic-concurrency updates against a record store
//! - A bounded worker pool with retries, dry-run and cancellation

pub mod checkpoint;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keyring;
pub mod logging;
pub mod orchestrator;
pub mod outcome;
pub mod record;
pub mod scanner;
pub mod store;
pub mod transformer;
pub mod updater;

pub use checkpoint::{clear_checkpoint, load_checkpoint, save_checkpoint, JobCheckpoint};
pub use config::{JobConfig, ResealConfig};
pub use crypto::{CryptoError, EcdhSealer, Sealer};
pub use error::{ErrorKind, Result, RotationError};
pub use keyring::{FileKeySource, KeyGeneration, KeyRing, KeySource, StaticKeySource};
pub use logging::{init_logging, LoggingConfig};
pub use orchestrator::{run_job, Orchestrator, ResumeCursorTracker, RetryPolicy};
pub use outcome::{
    JobCounters, JobSummary, Outcome, OutcomeReason, OutcomeStatus, RecordEvent, RecordIssue,
    RunState,
};
pub use record::{EncryptedRecord, LabelSelector, RecordId, Scope};
pub use scanner::Scanner;
pub use store::{
    Fault, InMemoryStore, JsonFileStore, ListRequest, Page, RecordStore, StoreError,
};
pub use transformer::{DecryptedPayload, Transformation, Transformer};
pub use updater::{ApplyOutcome, Updater};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
