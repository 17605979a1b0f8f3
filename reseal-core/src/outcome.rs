//! Per-record outcomes, the live event stream and the job summary

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::record::RecordId;

/// Tracing target for per-record audit events
pub const AUDIT_TARGET: &str = "reseal::audit";

/// Final classification of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    Skipped,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => f.write_str("success"),
            OutcomeStatus::Skipped => f.write_str("skipped"),
            OutcomeStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Why a record was skipped or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    /// Already sealed under the latest generation
    AlreadyCurrent,
    /// Another writer moved the record to the latest generation mid-run
    ExternallyModified,
    Error(ErrorKind),
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeReason::AlreadyCurrent => f.write_str("AlreadyCurrent"),
            OutcomeReason::ExternallyModified => f.write_str("ExternallyModified"),
            OutcomeReason::Error(kind) => fmt::Display::fmt(kind, f),
        }
    }
}

/// Result for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: RecordId,
    pub status: OutcomeStatus,
    pub reason: Option<OutcomeReason>,
    /// Whether a write reached the store (always false in dry-run)
    pub applied: bool,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl Outcome {
    pub fn success(id: RecordId, applied: bool) -> Self {
        Self::new(id, OutcomeStatus::Success, None, applied)
    }

    pub fn skipped(id: RecordId, reason: OutcomeReason) -> Self {
        Self::new(id, OutcomeStatus::Skipped, Some(reason), false)
    }

    pub fn failed(id: RecordId, kind: ErrorKind) -> Self {
        Self::new(id, OutcomeStatus::Failed, Some(OutcomeReason::Error(kind)), false)
    }

    fn new(
        id: RecordId,
        status: OutcomeStatus,
        reason: Option<OutcomeReason>,
        applied: bool,
    ) -> Self {
        Self {
            id,
            status,
            reason,
            applied,
            attempts: 1,
            duration_ms: 0,
        }
    }

    pub fn with_timing(mut self, attempts: u32, duration_ms: u64) -> Self {
        self.attempts = attempts;
        self.duration_ms = duration_ms;
        self
    }

    /// Skipped for a reason other than already being current
    pub fn is_warning(&self) -> bool {
        self.status == OutcomeStatus::Skipped && self.reason != Some(OutcomeReason::AlreadyCurrent)
    }
}

/// Real-time notification emitted as each record resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEvent {
    pub identity: RecordId,
    pub status: OutcomeStatus,
    pub reason: Option<OutcomeReason>,
    pub applied: bool,
    pub timestamp_utc: DateTime<Utc>,
    /// Resume cursor after this record was resolved
    pub resume_cursor: Option<RecordId>,
}

/// A record listed in the summary's errors or warnings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordIssue {
    pub identity: RecordId,
    pub reason: OutcomeReason,
}

/// Run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Starting,
    Processing,
    Draining,
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Starting => "starting",
            RunState::Processing => "processing",
            RunState::Draining => "draining",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Snapshot of the live counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub processed: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Final report of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub processed: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Failed records ordered by identity
    pub errors: Vec<RecordIssue>,
    /// Records skipped with a warning, ordered by identity
    pub warnings: Vec<RecordIssue>,
    /// Every outcome ordered by identity
    pub outcomes: Vec<Outcome>,
    /// Identity up to which every record has been resolved
    pub resume_cursor: Option<RecordId>,
    pub final_state: RunState,
    pub abort_reason: Option<String>,
}

impl JobSummary {
    /// Whether any record ended in `Failed`
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn is_complete(&self) -> bool {
        self.final_state == RunState::Completed
    }

    pub fn outcome(&self, id: &RecordId) -> Option<&Outcome> {
        self.outcomes
            .binary_search_by(|o| o.id.cmp(id))
            .ok()
            .map(|i| &self.outcomes[i])
    }

    pub fn counters(&self) -> JobCounters {
        JobCounters {
            processed: self.processed,
            succeeded: self.succeeded,
            skipped: self.skipped,
            failed: self.failed,
        }
    }
}

/// Parameters of the run being summarized
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
}

/// Thread-safe accumulator shared by all workers
pub struct OutcomeCollector {
    succeeded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    outcomes: Mutex<Vec<Outcome>>,
    events: Option<mpsc::UnboundedSender<RecordEvent>>,
}

impl OutcomeCollector {
    pub fn new(events: Option<mpsc::UnboundedSender<RecordEvent>>) -> Self {
        Self {
            succeeded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            outcomes: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Record one outcome, audit-log it and emit its event
    pub fn record(&self, outcome: Outcome, resume_cursor: Option<RecordId>) {
        let counter = match outcome.status {
            OutcomeStatus::Success => &self.succeeded,
            OutcomeStatus::Skipped => &self.skipped,
            OutcomeStatus::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        Self::audit(&outcome);

        if let Some(events) = &self.events {
            let event = RecordEvent {
                identity: outcome.id.clone(),
                status: outcome.status,
                reason: outcome.reason,
                applied: outcome.applied,
                timestamp_utc: Utc::now(),
                resume_cursor,
            };
            // A dropped receiver only stops progress reporting
            let _ = events.send(event);
        }

        self.outcomes.lock().push(outcome);
    }

    fn audit(outcome: &Outcome) {
        let reason = outcome
            .reason
            .map(|r| r.to_string())
            .unwrap_or_default();

        match outcome.status {
            OutcomeStatus::Failed => warn!(
                target: AUDIT_TARGET,
                identity = %outcome.id,
                status = %outcome.status,
                reason = %reason,
                attempts = outcome.attempts,
                duration_ms = outcome.duration_ms,
                "Record failed"
            ),
            OutcomeStatus::Skipped if outcome.is_warning() => warn!(
                target: AUDIT_TARGET,
                identity = %outcome.id,
                status = %outcome.status,
                reason = %reason,
                duration_ms = outcome.duration_ms,
                "Record skipped"
            ),
            _ => info!(
                target: AUDIT_TARGET,
                identity = %outcome.id,
                status = %outcome.status,
                reason = %reason,
                applied = outcome.applied,
                duration_ms = outcome.duration_ms,
                "Record resolved"
            ),
        }
    }

    pub fn counters(&self) -> JobCounters {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let skipped = self.skipped.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        JobCounters {
            processed: succeeded + skipped + failed,
            succeeded,
            skipped,
            failed,
        }
    }

    /// Build the final summary from everything recorded so far
    pub fn summarize(
        &self,
        run: &RunInfo,
        resume_cursor: Option<RecordId>,
        final_state: RunState,
        abort_reason: Option<String>,
    ) -> JobSummary {
        let mut outcomes = self.outcomes.lock().clone();
        outcomes.sort_by(|a, b| a.id.cmp(&b.id));

        let errors = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .filter_map(|o| {
                o.reason.map(|reason| RecordIssue {
                    identity: o.id.clone(),
                    reason,
                })
            })
            .collect();

        let warnings = outcomes
            .iter()
            .filter(|o| o.is_warning())
            .filter_map(|o| {
                o.reason.map(|reason| RecordIssue {
                    identity: o.id.clone(),
                    reason,
                })
            })
            .collect();

        let counters = self.counters();
        let elapsed = Utc::now() - run.started_at;

        JobSummary {
            job_id: run.job_id,
            started_at: run.started_at,
            duration_ms: elapsed.num_milliseconds().max(0) as u64,
            dry_run: run.dry_run,
            processed: counters.processed,
            succeeded: counters.succeeded,
            skipped: counters.skipped,
            failed: counters.failed,
            errors,
            warnings,
            outcomes,
            resume_cursor,
            final_state,
            abort_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> RecordId {
        RecordId::new("ns", name)
    }

    fn run_info() -> RunInfo {
        RunInfo {
            job_id: Uuid::new_v4(),
            started_at: Utc::now(),
            dry_run: false,
        }
    }

    #[test]
    fn test_counters_and_summary_ordering() {
        let collector = OutcomeCollector::new(None);
        collector.record(Outcome::failed(id("c"), ErrorKind::TransientStore), None);
        collector.record(Outcome::success(id("b"), true), None);
        collector.record(Outcome::skipped(id("a"), OutcomeReason::AlreadyCurrent), None);
        collector.record(
            Outcome::skipped(id("d"), OutcomeReason::Error(ErrorKind::UnknownKeyLabel)),
            None,
        );

        let counters = collector.counters();
        assert_eq!(counters.processed, 4);
        assert_eq!(counters.succeeded, 1);
        assert_eq!(counters.skipped, 2);
        assert_eq!(counters.failed, 1);

        let summary = collector.summarize(&run_info(), Some(id("d")), RunState::Completed, None);
        let order: Vec<&str> = summary.outcomes.iter().map(|o| o.id.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);

        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].identity, id("c"));
        assert_eq!(
            summary.errors[0].reason,
            OutcomeReason::Error(ErrorKind::TransientStore)
        );

        assert_eq!(summary.warnings.len(), 1);
        assert_eq!(summary.warnings[0].identity, id("d"));

        assert!(summary.has_failures());
        assert!(summary.is_complete());
        assert!(summary.outcome(&id("b")).unwrap().applied);
    }

    #[tokio::test]
    async fn test_events_are_streamed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let collector = OutcomeCollector::new(Some(tx));

        collector.record(Outcome::success(id("a"), false), Some(id("a")));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.identity, id("a"));
        assert_eq!(event.status, OutcomeStatus::Success);
        assert!(!event.applied);
        assert_eq!(event.resume_cursor, Some(id("a")));
    }

    #[test]
    fn test_dropped_receiver_is_tolerated() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let collector = OutcomeCollector::new(Some(tx));
        collector.record(Outcome::success(id("a"), true), None);
        assert_eq!(collector.counters().succeeded, 1);
    }

    #[test]
    fn test_summary_serializes() {
        let collector = OutcomeCollector::new(None);
        collector.record(
            Outcome::skipped(id("a"), OutcomeReason::ExternallyModified),
            None,
        );
        let summary = collector.summarize(&run_info(), None, RunState::Aborted, Some("x".into()));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["final_state"], "Aborted");
        assert_eq!(json["outcomes"][0]["reason"], "externally_modified");
    }
}
