//! Orchestration of a re-encryption run
//!
//! A single dispatcher walks the scanner and feeds a bounded channel; a
//! fixed pool of workers pulls records off it and runs
//! transform -> apply with bounded retries. Run lifecycle:
//!
//! ```text
//! Starting -> Processing -> (Draining) -> Completed | Aborted
//! ```
//!
//! Draining is entered on external cancellation or a run-fatal error: no
//! new records are dispatched, records already picked up by a worker are
//! finished, and queued records are abandoned for the next run.

pub mod cursor;
pub mod retry;

pub use cursor::ResumeCursorTracker;
pub use retry::RetryPolicy;

use async_channel::{Receiver, Sender};
use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::crypto::{EcdhSealer, Sealer};
use crate::error::{ErrorKind, Result, RotationError};
use crate::keyring::{KeyRing, KeySource};
use crate::outcome::{
    JobSummary, Outcome, OutcomeCollector, OutcomeReason, RecordEvent, RunInfo, RunState,
};
use crate::record::{EncryptedRecord, RecordId, Scope};
use crate::scanner::Scanner;
use crate::store::RecordStore;
use crate::transformer::{Transformation, Transformer};
use crate::updater::{ApplyOutcome, Updater};

/// Unit of work handed to a worker
#[derive(Debug)]
pub struct WorkItem {
    pub record: EncryptedRecord,
    pub attempt: u32,
}

/// Successful end of one attempt
enum Resolution {
    Resealed { applied: bool },
    AlreadyCurrent,
}

/// State shared by the dispatcher and all workers of one run
struct RunContext {
    store: Arc<dyn RecordStore>,
    transformer: Transformer,
    updater: Updater,
    collector: OutcomeCollector,
    tracker: ResumeCursorTracker,
    retry: RetryPolicy,
    record_timeout: Duration,
    drain: CancellationToken,
    abort_reason: Mutex<Option<(ErrorKind, String)>>,
    state: Arc<Mutex<RunState>>,
}

impl RunContext {
    /// Stop dispatching because of a run-fatal error
    fn abort(&self, kind: ErrorKind, reason: String) {
        {
            let mut slot = self.abort_reason.lock();
            if slot.is_none() {
                error!(%kind, %reason, "Aborting run");
                *slot = Some((kind, reason));
            }
        }
        self.begin_drain();
    }

    fn begin_drain(&self) {
        {
            let mut state = self.state.lock();
            if *state == RunState::Processing {
                *state = RunState::Draining;
                info!(
                    outstanding = self.tracker.outstanding(),
                    "Draining: no new records will be dispatched"
                );
            }
        }
        self.drain.cancel();
    }

    /// Run one attempt under the record timeout; `None` when it elapsed
    async fn timed<T>(&self, op: impl Future<Output = Result<T>>) -> Option<Result<T>> {
        tokio::time::timeout(self.record_timeout, op).await.ok()
    }

    async fn refresh(&self, id: &RecordId, expected: &str) -> Result<EncryptedRecord> {
        match self.store.get(id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(RotationError::NotFound(id.clone())),
            Err(e) => Err(e.into_rotation_error(id, expected)),
        }
    }

    async fn attempt(&self, record: &EncryptedRecord) -> Result<Resolution> {
        match self.transformer.transform(record)? {
            Transformation::AlreadyCurrent(_) => Ok(Resolution::AlreadyCurrent),
            Transformation::Resealed { record: candidate, .. } => {
                match self.updater.apply(&candidate).await? {
                    ApplyOutcome::Applied { .. } => Ok(Resolution::Resealed { applied: true }),
                    ApplyOutcome::DryRun => Ok(Resolution::Resealed { applied: false }),
                }
            }
        }
    }

    /// Drive one record to a final outcome
    async fn process(&self, item: WorkItem) {
        let started = Instant::now();
        let id = item.record.id.clone();
        let mut record = item.record;
        let mut attempt = item.attempt.max(1);
        // Set once a write may have landed that this worker did not observe:
        // a version conflict, or a timeout that could have fired after the
        // store committed our update.
        let mut moved_underneath = false;
        let max_attempts = self.retry.max_attempts();

        let outcome = loop {
            let result = self
                .timed(async {
                    if attempt > 1 {
                        let fresh = self.refresh(&id, &record.resource_version).await?;
                        record = fresh;
                    }
                    self.attempt(&record).await
                })
                .await
                .unwrap_or_else(|| {
                    moved_underneath = true;
                    Err(RotationError::TransientStore(format!(
                        "{} timed out after {:?}",
                        id, self.record_timeout
                    )))
                });

            match result {
                Ok(Resolution::Resealed { applied }) => break Outcome::success(id.clone(), applied),
                Ok(Resolution::AlreadyCurrent) if moved_underneath => {
                    break Outcome::skipped(id.clone(), OutcomeReason::ExternallyModified)
                }
                Ok(Resolution::AlreadyCurrent) => {
                    break Outcome::skipped(id.clone(), OutcomeReason::AlreadyCurrent)
                }
                Err(e) if e.is_run_fatal() => {
                    let outcome = Outcome::failed(id.clone(), e.kind())
                        .with_timing(attempt, elapsed_ms(started));
                    // Never resolved, so a resumed run picks it up again
                    self.tracker.abandon(&id);
                    self.collector.record(outcome, self.tracker.cursor());
                    self.abort(e.kind(), format!("{}: {}", id, e));
                    return;
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    if matches!(e, RotationError::Conflict { .. }) {
                        moved_underneath = true;
                    }
                    let delay = self.retry.delay_for(attempt);
                    debug!(record = %id, attempt, ?delay, error = %e, "Retrying record");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    warn!(record = %id, attempts = attempt, error = %e, "Retries exhausted");
                    break Outcome::failed(id.clone(), e.kind());
                }
                Err(e) => {
                    warn!(record = %id, error = %e, "Skipping record");
                    break Outcome::skipped(id.clone(), OutcomeReason::Error(e.kind()));
                }
            }
        };

        let outcome = outcome.with_timing(attempt, elapsed_ms(started));
        self.tracker
            .resolve_with(&id, |cursor| self.collector.record(outcome, cursor.cloned()));
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u64::MAX as u128) as u64
}

async fn worker_loop(ctx: Arc<RunContext>, rx: Receiver<WorkItem>, worker_id: usize) {
    debug!(worker_id, "Worker started");
    loop {
        let item = tokio::select! {
            biased;
            _ = ctx.drain.cancelled() => break,
            item = rx.recv() => match item {
                Ok(item) => item,
                Err(_) => break,
            },
        };
        ctx.process(item).await;
    }
    debug!(worker_id, "Worker stopped");
}

/// Drives re-encryption runs against one store
pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    key_source: Arc<dyn KeySource>,
    sealer: Arc<dyn Sealer>,
    events: Option<mpsc::UnboundedSender<RecordEvent>>,
    cancel: CancellationToken,
    state: Arc<Mutex<RunState>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn RecordStore>, key_source: Arc<dyn KeySource>) -> Self {
        Self {
            store,
            key_source,
            sealer: Arc::new(EcdhSealer::new()),
            events: None,
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(RunState::Starting)),
        }
    }

    pub fn with_sealer(mut self, sealer: Arc<dyn Sealer>) -> Self {
        self.sealer = sealer;
        self
    }

    /// Stream a `RecordEvent` per resolved record as it happens
    pub fn with_event_sink(mut self, events: mpsc::UnboundedSender<RecordEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that moves the current run into Draining when cancelled
    ///
    /// Cancellation is sticky: once cancelled, later runs on this
    /// orchestrator drain immediately.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock() = state;
    }

    /// Execute one run
    ///
    /// Returns the summary for completed and cancelled runs. Run-fatal
    /// store errors return `RotationError::RunAborted` carrying the
    /// partial summary; key-ring failures return before any work starts.
    pub async fn run(&self, config: &JobConfig) -> Result<JobSummary> {
        config.validate()?;

        let run = RunInfo {
            job_id: config.job_id.unwrap_or_else(Uuid::new_v4),
            started_at: Utc::now(),
            dry_run: config.dry_run,
        };
        self.set_state(RunState::Starting);
        info!(
            job_id = %run.job_id,
            scope = %config.scope,
            dry_run = config.dry_run,
            concurrency = config.concurrency,
            resume_cursor = ?config.resume_cursor.as_ref().map(ToString::to_string),
            "Starting re-encryption run"
        );

        let keyring = match self.load_keyring().await {
            Ok(keyring) => Arc::new(keyring),
            Err(e) => {
                self.set_state(RunState::Aborted);
                error!(job_id = %run.job_id, error = %e, "Key ring unavailable, aborting run");
                return Err(e);
            }
        };

        let latest_label = keyring.latest_label().to_string();
        let ctx = Arc::new(RunContext {
            store: self.store.clone(),
            transformer: Transformer::new(keyring, self.sealer.clone()),
            updater: Updater::new(self.store.clone(), latest_label.clone(), config.dry_run),
            collector: OutcomeCollector::new(self.events.clone()),
            tracker: ResumeCursorTracker::new(config.resume_cursor.clone()),
            retry: config.retry.clone(),
            record_timeout: config.record_timeout,
            drain: self.cancel.child_token(),
            abort_reason: Mutex::new(None),
            state: self.state.clone(),
        });

        let (tx, rx) = async_channel::bounded(config.concurrency);
        let mut workers = JoinSet::new();
        for worker_id in 0..config.concurrency {
            workers.spawn(worker_loop(ctx.clone(), rx.clone(), worker_id));
        }

        self.set_state(RunState::Processing);
        info!(latest = %latest_label, workers = config.concurrency, "Processing records");

        let mut scanner = Scanner::new(
            self.store.clone(),
            config.scope.clone(),
            config.label_selector.clone(),
            config.page_size,
            config.resume_cursor.clone(),
        )
        .with_retry(config.retry.clone());

        Self::dispatch(&ctx, &mut scanner, &tx).await;
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }

        let mut abandoned = 0usize;
        while let Ok(item) = rx.try_recv() {
            ctx.tracker.abandon(&item.record.id);
            abandoned += 1;
        }
        if abandoned > 0 {
            info!(abandoned, "Queued records left for a resumed run");
        }

        let abort_reason = ctx.abort_reason.lock().clone();
        let cancelled = self.cancel.is_cancelled();
        let final_state = if abort_reason.is_some() || cancelled {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        self.set_state(final_state);

        let reason = abort_reason
            .as_ref()
            .map(|(_, reason)| reason.clone())
            .or_else(|| cancelled.then(|| "cancelled".to_string()));
        let summary = ctx
            .collector
            .summarize(&run, ctx.tracker.cursor(), final_state, reason);

        info!(
            job_id = %summary.job_id,
            state = %summary.final_state,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            resume_cursor = ?summary.resume_cursor.as_ref().map(ToString::to_string),
            "Run finished"
        );

        match abort_reason {
            Some((kind, reason)) => Err(RotationError::RunAborted {
                kind,
                reason,
                summary: Box::new(summary),
            }),
            None => Ok(summary),
        }
    }

    async fn load_keyring(&self) -> Result<KeyRing> {
        let material = self.key_source.load().await?;
        KeyRing::load(&material)
    }

    /// Feed scanned records to the workers until the scan ends or draining starts
    async fn dispatch(ctx: &RunContext, scanner: &mut Scanner, tx: &Sender<WorkItem>) {
        let mut dispatched = 0u64;

        'scan: loop {
            let page = tokio::select! {
                biased;
                _ = ctx.drain.cancelled() => break 'scan,
                page = scanner.next_page() => page,
            };

            let records = match page {
                Ok(Some(records)) => records,
                Ok(None) => break,
                Err(e) => {
                    ctx.abort(e.kind(), format!("record scan failed: {}", e));
                    break;
                }
            };

            for record in records {
                let id = record.id.clone();
                ctx.tracker.register(id.clone());

                let item = WorkItem { record, attempt: 1 };
                let sent = tokio::select! {
                    biased;
                    _ = ctx.drain.cancelled() => false,
                    sent = tx.send(item) => sent.is_ok(),
                };
                if !sent {
                    ctx.tracker.abandon(&id);
                    break 'scan;
                }
                dispatched += 1;
            }
        }

        if ctx.drain.is_cancelled() {
            ctx.begin_drain();
        }
        debug!(dispatched, pages = scanner.pages(), "Dispatch finished");
    }
}

/// Run one job with the default sealer
pub async fn run_job(
    store: Arc<dyn RecordStore>,
    key_source: Arc<dyn KeySource>,
    scope: Scope,
    dry_run: bool,
    concurrency: usize,
    resume_cursor: Option<RecordId>,
) -> Result<JobSummary> {
    let config = JobConfig::new(scope)
        .with_dry_run(dry_run)
        .with_concurrency(concurrency)
        .with_resume_cursor(resume_cursor);
    Orchestrator::new(store, key_source).run(&config).await
}
