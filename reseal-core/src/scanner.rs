//! Paginated, restartable enumeration of target records

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, RotationError};
use crate::orchestrator::RetryPolicy;
use crate::record::{EncryptedRecord, LabelSelector, RecordId, Scope};
use crate::store::{ListRequest, RecordStore};

/// Lazily walks the store in ascending identity order
///
/// Starting after a resume cursor, the first request carries the cursor
/// as its page token, so earlier pages are never fetched. Every emitted
/// identity is strictly greater than the previous one.
pub struct Scanner {
    store: Arc<dyn RecordStore>,
    scope: Scope,
    label_selector: Option<LabelSelector>,
    page_size: usize,
    retry: RetryPolicy,
    next_token: Option<String>,
    last_seen: Option<RecordId>,
    exhausted: bool,
    pages: u64,
}

impl Scanner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        scope: Scope,
        label_selector: Option<LabelSelector>,
        page_size: usize,
        start_after: Option<RecordId>,
    ) -> Self {
        Self {
            store,
            scope,
            label_selector,
            page_size: page_size.max(1),
            retry: RetryPolicy::default(),
            next_token: start_after.as_ref().map(ToString::to_string),
            last_seen: start_after,
            exhausted: false,
            pages: 0,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pages fetched so far
    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Fetch the next non-empty page, `None` when the scan is finished
    pub async fn next_page(&mut self) -> Result<Option<Vec<EncryptedRecord>>> {
        while !self.exhausted {
            let page = self.fetch().await?;
            self.pages += 1;
            self.exhausted = page.next_page_token.is_none();
            self.next_token = page.next_page_token;

            let fetched = page.items.len();
            let mut items = Vec::with_capacity(fetched);
            for record in page.items {
                if self.last_seen.as_ref().map_or(false, |last| &record.id <= last) {
                    continue;
                }
                self.last_seen = Some(record.id.clone());
                items.push(record);
            }

            debug!(
                page = self.pages,
                fetched,
                kept = items.len(),
                more = !self.exhausted,
                "Scanned page"
            );

            if !items.is_empty() {
                return Ok(Some(items));
            }
        }
        Ok(None)
    }

    async fn fetch(&self) -> Result<crate::store::Page> {
        let mut attempt = 1;
        loop {
            let request = ListRequest {
                scope: self.scope.clone(),
                label_selector: self.label_selector.clone(),
                page_token: self.next_token.clone(),
                page_size: self.page_size,
            };

            let anchor = self
                .last_seen
                .clone()
                .unwrap_or_else(|| RecordId::new(self.scope.to_string(), "*"));

            let error = match self.store.list(request).await {
                Ok(page) => return Ok(page),
                Err(e) => e.into_rotation_error(&anchor, ""),
            };

            if !error.is_retryable() || attempt >= self.retry.max_attempts() {
                return Err(match error {
                    RotationError::Conflict { .. } => {
                        RotationError::TransientStore(format!("listing after {}: {}", anchor, error))
                    }
                    other => other,
                });
            }

            let delay = self.retry.delay_for(attempt);
            warn!(attempt, ?delay, error = %error, "Page fetch failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
