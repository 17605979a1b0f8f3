//! Conditional write of resealed records

use std::sync::Arc;
use tracing::debug;

use crate::crypto::envelope;
use crate::error::{Result, RotationError};
use crate::record::EncryptedRecord;
use crate::store::RecordStore;

/// What `apply` did with a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Written; carries the store's new resource version
    Applied { resource_version: String },
    /// Validated but not written
    DryRun,
}

/// Applies candidates under the resource version captured at read time
pub struct Updater {
    store: Arc<dyn RecordStore>,
    dry_run: bool,
    latest_label: String,
}

impl Updater {
    pub fn new(store: Arc<dyn RecordStore>, latest_label: impl Into<String>, dry_run: bool) -> Self {
        Self {
            store,
            dry_run,
            latest_label: latest_label.into(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub async fn apply(&self, candidate: &EncryptedRecord) -> Result<ApplyOutcome> {
        self.validate(candidate)?;

        if self.dry_run {
            debug!(record = %candidate.id, "Dry run, skipping write");
            return Ok(ApplyOutcome::DryRun);
        }

        let resource_version = self
            .store
            .update(candidate, &candidate.resource_version)
            .await
            .map_err(|e| e.into_rotation_error(&candidate.id, &candidate.resource_version))?;

        debug!(
            record = %candidate.id,
            from = %candidate.resource_version,
            to = %resource_version,
            "Applied resealed record"
        );
        Ok(ApplyOutcome::Applied { resource_version })
    }

    /// Well-formedness check run in both modes
    fn validate(&self, candidate: &EncryptedRecord) -> Result<()> {
        let invalid = |reason: &str| RotationError::InvalidRecord {
            id: candidate.id.clone(),
            reason: reason.to_string(),
        };

        if candidate.id.namespace.is_empty() || candidate.id.name.is_empty() {
            return Err(invalid("empty identity"));
        }
        if candidate.resource_version.is_empty() {
            return Err(invalid("missing resource version"));
        }

        let (label, body) = envelope::split(&candidate.ciphertext)
            .map_err(|e| invalid(&e.to_string()))?;
        match label {
            Some(label) if label == self.latest_label => {}
            Some(label) => return Err(invalid(&format!("sealed under {} instead of latest", label))),
            None => return Err(invalid("ciphertext carries no key label")),
        }
        if candidate.key_label.as_deref() != label {
            return Err(invalid("key label does not match envelope"));
        }
        if body.is_empty() {
            return Err(invalid("empty sealed body"));
        }
        Ok(())
    }
}
