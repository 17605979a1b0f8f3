//! Record store backed by a JSON file
//!
//! The file is read once into an `InMemoryStore` and written back with
//! `flush()`. Ciphertext is stored base64-encoded.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{InMemoryStore, ListRequest, Page, RecordStore, StoreError};
use crate::record::{EncryptedRecord, RecordId};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordsFile {
    records: Vec<StoredRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    namespace: String,
    name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    /// Base64 of the enveloped ciphertext
    ciphertext: String,
}

/// JSON-file store for operator use and local testing
pub struct JsonFileStore {
    path: PathBuf,
    inner: InMemoryStore,
}

impl JsonFileStore {
    /// Load records from `path`; a missing file yields an empty store
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let inner = InMemoryStore::new();

        if path.exists() {
            let json = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read records file: {}", path.display()))?;
            let file: RecordsFile = serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse records file: {}", path.display()))?;

            for stored in file.records {
                let ciphertext = general_purpose::STANDARD
                    .decode(stored.ciphertext.as_bytes())
                    .with_context(|| {
                        format!(
                            "Invalid base64 ciphertext for {}/{}",
                            stored.namespace, stored.name
                        )
                    })?;
                let id = RecordId::new(stored.namespace, stored.name);
                inner.insert(EncryptedRecord::new(id, ciphertext, "").with_labels(stored.labels));
            }
            info!(records = inner.len(), path = %path.display(), "Loaded records file");
        } else {
            debug!(path = %path.display(), "Records file not found, starting empty");
        }

        Ok(Self { path, inner })
    }

    /// Write all records back to disk atomically
    pub fn flush(&self) -> Result<()> {
        Self::write_records(&self.path, &self.inner.records())
    }

    /// Serialize records to `path` via a temp file and rename
    pub fn write_records(path: &Path, records: &[EncryptedRecord]) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let file = RecordsFile {
            records: records
                .iter()
                .map(|r| StoredRecord {
                    namespace: r.id.namespace.clone(),
                    name: r.id.name.clone(),
                    labels: r.labels.clone(),
                    ciphertext: general_purpose::STANDARD.encode(&r.ciphertext),
                })
                .collect(),
        };

        let json = serde_json::to_string_pretty(&file).context("Failed to serialize records")?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!(records = records.len(), path = %path.display(), "Flushed records file");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Underlying in-memory view
    pub fn memory(&self) -> &InMemoryStore {
        &self.inner
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn list(&self, request: ListRequest) -> Result<Page, StoreError> {
        self.inner.list(request).await
    }

    async fn get(&self, id: &RecordId) -> Result<Option<EncryptedRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn update(
        &self,
        record: &EncryptedRecord,
        expected_version: &str,
    ) -> Result<String, StoreError> {
        self.inner.update(record, expected_version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::envelope;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("records.json")).unwrap();
        assert!(store.memory().is_empty());
    }

    #[tokio::test]
    async fn test_flush_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("records.json");

        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "payments".to_string());
        let wrapped = envelope::wrap("gen-1", b"body").unwrap();
        JsonFileStore::write_records(
            &path,
            &[
                EncryptedRecord::new(RecordId::new("prod", "api-token"), wrapped.clone(), "7")
                    .with_labels(labels.clone()),
                EncryptedRecord::new(RecordId::new("prod", "legacy"), vec![0xde, 0xad], "8"),
            ],
        )
        .unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        let token = store
            .get(&RecordId::new("prod", "api-token"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.key_label.as_deref(), Some("gen-1"));
        assert_eq!(token.ciphertext, wrapped);
        assert_eq!(token.labels, labels);

        let legacy = store.memory().record(&RecordId::new("prod", "legacy")).unwrap();
        assert!(legacy.is_legacy());

        // Update then flush, and the change survives a reopen
        let mut changed = token.clone();
        changed.ciphertext = envelope::wrap("gen-2", b"new").unwrap();
        store.update(&changed, &token.resource_version).await.unwrap();
        store.flush().unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        let after = reopened
            .memory()
            .record(&RecordId::new("prod", "api-token"))
            .unwrap();
        assert_eq!(after.key_label.as_deref(), Some("gen-2"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        fs::write(
            &path,
            r#"{"records":[{"namespace":"ns","name":"a","ciphertext":"!!!"}]}"#,
        )
        .unwrap();
        assert!(JsonFileStore::open(&path).is_err());
    }
}
