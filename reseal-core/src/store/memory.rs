//! In-process record store with fault injection

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::trace;

use super::{ListRequest, Page, RecordStore, StoreError};
use crate::record::{EncryptedRecord, RecordId};

/// A failure to inject into a store operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Report a version conflict without touching the record
    Conflict,
    /// Report a temporary outage
    Transient,
    /// Report a permission denial
    Unauthorized,
    /// Another writer replaces the ciphertext just before this update lands
    ConcurrentWrite(Vec<u8>),
}

impl Fault {
    fn into_error(self, current: &str) -> StoreError {
        match self {
            Fault::Conflict | Fault::ConcurrentWrite(_) => StoreError::Conflict {
                current: current.to_string(),
            },
            Fault::Transient => StoreError::Transient("injected outage".to_string()),
            Fault::Unauthorized => StoreError::Unauthorized("injected denial".to_string()),
        }
    }
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordId, EncryptedRecord>,
    update_faults: HashMap<RecordId, VecDeque<Fault>>,
    list_faults: VecDeque<Fault>,
    next_version: u64,
    writes: u64,
}

impl Inner {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// Store held entirely in memory, ordered by record identity
///
/// Resource versions come from a single monotonically increasing counter.
/// The page token is the identity of the last item of the previous page.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, assigning a fresh resource version
    pub fn insert(&self, mut record: EncryptedRecord) -> String {
        let mut inner = self.inner.lock();
        let version = inner.bump_version();
        record.resource_version = version.clone();
        inner.records.insert(record.id.clone(), record);
        version
    }

    pub fn remove(&self, id: &RecordId) -> Option<EncryptedRecord> {
        self.inner.lock().records.remove(id)
    }

    /// Simulate a write by another actor
    pub fn external_write(&self, id: &RecordId, ciphertext: Vec<u8>) -> Option<String> {
        let mut inner = self.inner.lock();
        if !inner.records.contains_key(id) {
            return None;
        }
        let version = inner.bump_version();
        let record = inner.records.get_mut(id)?;
        let labels = std::mem::take(&mut record.labels);
        *record = EncryptedRecord::new(id.clone(), ciphertext, version.clone()).with_labels(labels);
        Some(version)
    }

    /// Fail the next `times` updates of `id` with `fault`
    pub fn inject_fault(&self, id: &RecordId, fault: Fault, times: usize) {
        let mut inner = self.inner.lock();
        let queue = inner.update_faults.entry(id.clone()).or_default();
        queue.extend(std::iter::repeat(fault).take(times));
    }

    /// Fail the next `times` list calls with `fault`
    pub fn inject_list_fault(&self, fault: Fault, times: usize) {
        let mut inner = self.inner.lock();
        inner.list_faults.extend(std::iter::repeat(fault).take(times));
    }

    /// Number of successful conditional updates
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Current state of one record
    pub fn record(&self, id: &RecordId) -> Option<EncryptedRecord> {
        self.inner.lock().records.get(id).cloned()
    }

    /// All records in identity order
    pub fn records(&self) -> Vec<EncryptedRecord> {
        self.inner.lock().records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn list(&self, request: ListRequest) -> Result<Page, StoreError> {
        let mut inner = self.inner.lock();

        if let Some(fault) = inner.list_faults.pop_front() {
            return Err(fault.into_error(""));
        }

        let after = match request.page_token.as_deref() {
            Some(token) => Some(token.parse::<RecordId>().map_err(StoreError::Backend)?),
            None => None,
        };
        let page_size = request.page_size.max(1);

        let mut matching = inner
            .records
            .values()
            .filter(|r| after.as_ref().map_or(true, |a| &r.id > a))
            .filter(|r| request.scope.contains(&r.id))
            .filter(|r| {
                request
                    .label_selector
                    .as_ref()
                    .map_or(true, |s| s.matches(&r.labels))
            });

        let items: Vec<EncryptedRecord> = matching.by_ref().take(page_size).cloned().collect();
        let next_page_token = match (matching.next(), items.last()) {
            (Some(_), Some(last)) => Some(last.id.to_string()),
            _ => None,
        };

        trace!(items = items.len(), more = next_page_token.is_some(), "Listed page");
        Ok(Page {
            items,
            next_page_token,
        })
    }

    async fn get(&self, id: &RecordId) -> Result<Option<EncryptedRecord>, StoreError> {
        Ok(self.inner.lock().records.get(id).cloned())
    }

    async fn update(
        &self,
        record: &EncryptedRecord,
        expected_version: &str,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();

        let current = inner
            .records
            .get(&record.id)
            .map(|r| r.resource_version.clone())
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;

        let fault = inner
            .update_faults
            .get_mut(&record.id)
            .and_then(VecDeque::pop_front);
        if let Some(fault) = fault {
            let current = match &fault {
                Fault::ConcurrentWrite(ciphertext) => {
                    let version = inner.bump_version();
                    if let Some(stored) = inner.records.get_mut(&record.id) {
                        let labels = std::mem::take(&mut stored.labels);
                        *stored = EncryptedRecord::new(
                            record.id.clone(),
                            ciphertext.clone(),
                            version.clone(),
                        )
                        .with_labels(labels);
                    }
                    version
                }
                _ => current,
            };
            return Err(fault.into_error(&current));
        }

        if current != expected_version {
            return Err(StoreError::Conflict { current });
        }

        let version = inner.bump_version();
        let mut stored = record.clone();
        stored.resource_version = version.clone();
        inner.records.insert(record.id.clone(), stored);
        inner.writes += 1;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Scope;
    use std::collections::BTreeMap;

    fn record(ns: &str, name: &str) -> EncryptedRecord {
        EncryptedRecord::new(RecordId::new(ns, name), vec![1, 2, 3], "")
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        for (ns, name) in [("b", "1"), ("a", "2"), ("a", "1"), ("c", "1"), ("b", "2")] {
            store.insert(record(ns, name));
        }
        store
    }

    async fn list_all(store: &InMemoryStore, scope: Scope, page_size: usize) -> Vec<String> {
        let mut ids = Vec::new();
        let mut token = None;
        loop {
            let page = store
                .list(ListRequest {
                    scope: scope.clone(),
                    label_selector: None,
                    page_token: token,
                    page_size,
                })
                .await
                .unwrap();
            ids.extend(page.items.iter().map(|r| r.id.to_string()));
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        ids
    }

    #[tokio::test]
    async fn test_list_pages_in_identity_order() {
        let store = seeded();
        let ids = list_all(&store, Scope::All, 2).await;
        assert_eq!(ids, vec!["a/1", "a/2", "b/1", "b/2", "c/1"]);

        let scoped = list_all(&store, Scope::Namespace("b".to_string()), 1).await;
        assert_eq!(scoped, vec!["b/1", "b/2"]);
    }

    #[tokio::test]
    async fn test_list_filters_by_selector() {
        let store = InMemoryStore::new();
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "api".to_string());
        store.insert(record("ns", "tagged").with_labels(labels));
        store.insert(record("ns", "plain"));

        let page = store
            .list(ListRequest {
                scope: Scope::All,
                label_selector: Some("app=api".parse().unwrap()),
                page_token: None,
                page_size: 10,
            })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id.name, "tagged");
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = InMemoryStore::new();
        let v1 = store.insert(record("ns", "a"));
        let current = store.record(&RecordId::new("ns", "a")).unwrap();

        let v2 = store.update(&current, &v1).await.unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.write_count(), 1);

        // Stale version is rejected
        let err = store.update(&current, &v1).await.unwrap_err();
        assert_eq!(err, StoreError::Conflict { current: v2 });
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        let store = InMemoryStore::new();
        let id = RecordId::new("ns", "a");
        let version = store.insert(record("ns", "a"));
        store.inject_fault(&id, Fault::Transient, 2);

        let current = store.record(&id).unwrap();
        assert!(matches!(
            store.update(&current, &version).await,
            Err(StoreError::Transient(_))
        ));
        assert!(matches!(
            store.update(&current, &version).await,
            Err(StoreError::Transient(_))
        ));
        assert!(store.update(&current, &version).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_write_fault_replaces_record() {
        let store = InMemoryStore::new();
        let id = RecordId::new("ns", "a");
        let version = store.insert(record("ns", "a"));
        store.inject_fault(&id, Fault::ConcurrentWrite(vec![9, 9]), 1);

        let current = store.record(&id).unwrap();
        let err = store.update(&current, &version).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.record(&id).unwrap().ciphertext, vec![9, 9]);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemoryStore::new();
        let err = store.update(&record("ns", "ghost"), "1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
