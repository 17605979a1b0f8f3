//! Record store interface for re-encryption
//!
//! The pipeline only needs three operations from the remote store:
//! - paginated listing in identity order
//! - a point read to refresh a record before retrying
//! - a conditional update guarded by the resource version
//!
//! Transport, authentication and wire protocol stay behind this trait.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::{Fault, InMemoryStore};

use async_trait::async_trait;

use crate::error::RotationError;
use crate::record::{EncryptedRecord, LabelSelector, RecordId, Scope};

/// Store collaborator errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("resource version conflict (current: {current})")]
    Conflict { current: String },

    #[error("record not found: {0}")]
    NotFound(RecordId),

    #[error("store temporarily unavailable: {0}")]
    Transient(String),

    #[error("permission denied: {0}")]
    Unauthorized(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Map onto the pipeline taxonomy for an operation on `id`
    ///
    /// `expected` is the resource version the caller held.
    pub fn into_rotation_error(self, id: &RecordId, expected: &str) -> RotationError {
        match self {
            StoreError::Conflict { .. } => RotationError::Conflict {
                id: id.clone(),
                expected: expected.to_string(),
            },
            StoreError::NotFound(id) => RotationError::NotFound(id),
            StoreError::Transient(msg) | StoreError::Backend(msg) => {
                RotationError::TransientStore(msg)
            }
            StoreError::Unauthorized(msg) => RotationError::FatalAuth(msg),
        }
    }
}

/// One page request
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub scope: Scope,
    pub label_selector: Option<LabelSelector>,
    /// Opaque token from the previous page, `None` for the first page
    pub page_token: Option<String>,
    pub page_size: usize,
}

/// One page of records in ascending identity order
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<EncryptedRecord>,
    pub next_page_token: Option<String>,
}

/// Paginated, optimistically-concurrent record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List one page of records matching scope and selector
    ///
    /// Items are ordered by `RecordId`. `next_page_token` is `None` on
    /// the last page.
    async fn list(&self, request: ListRequest) -> Result<Page, StoreError>;

    /// Read the current state of a record
    async fn get(&self, id: &RecordId) -> Result<Option<EncryptedRecord>, StoreError>;

    /// Replace a record's ciphertext if its version still equals `expected_version`
    ///
    /// Returns the new resource version.
    async fn update(
        &self,
        record: &EncryptedRecord,
        expected_version: &str,
    ) -> Result<String, StoreError>;
}
