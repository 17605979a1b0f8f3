//! Run report printed after every `reseal run` and optionally saved as JSON

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reseal_core::{JobSummary, RunState, Scope};
use serde::Serialize;
use std::path::Path;

use crate::commands::{EXIT_ABORTED, EXIT_FAILURES, EXIT_OK};

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub reseal_version: String,
    pub generated_at: DateTime<Utc>,
    pub store: String,
    pub scope: String,
    pub summary: JobSummary,
}

impl RunReport {
    pub fn new(summary: JobSummary, store: &Path, scope: &Scope) -> Self {
        Self {
            reseal_version: reseal_core::VERSION.to_string(),
            generated_at: Utc::now(),
            store: store.display().to_string(),
            scope: scope.to_string(),
            summary,
        }
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> u8 {
        match self.summary.final_state {
            RunState::Completed if self.summary.has_failures() => EXIT_FAILURES,
            RunState::Completed => EXIT_OK,
            _ => EXIT_ABORTED,
        }
    }

    /// Print the report
    pub fn print(&self) {
        let s = &self.summary;
        println!("\n=== Reseal Report ===");
        println!("Job: {}", s.job_id);
        println!("Store: {} (scope: {})", self.store, self.scope);
        if s.dry_run {
            println!("Mode: dry-run (no records written)");
        }
        println!("State: {}", s.final_state);
        if let Some(reason) = &s.abort_reason {
            println!("Abort reason: {}", reason);
        }
        println!("Processed: {}", s.processed);
        println!("  Succeeded: {}", s.succeeded);
        println!("  Skipped:   {}", s.skipped);
        println!("  Failed:    {}", s.failed);
        println!("Duration: {} ms", s.duration_ms);
        match &s.resume_cursor {
            Some(cursor) => println!("Resume cursor: {}", cursor),
            None => println!("Resume cursor: (none)"),
        }

        if !s.errors.is_empty() {
            println!("Errors:");
            for issue in &s.errors {
                println!("  {}  {}", issue.identity, issue.reason);
            }
        }
        if !s.warnings.is_empty() {
            println!("Warnings:");
            for issue in &s.warnings {
                println!("  {}  {}", issue.identity, issue.reason);
            }
        }
        println!("=====================\n");
    }

    /// Save as pretty JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reseal_core::outcome::{OutcomeCollector, RunInfo};
    use reseal_core::{ErrorKind, Outcome, RecordId};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn summary(outcomes: Vec<Outcome>, state: RunState) -> JobSummary {
        let collector = OutcomeCollector::new(None);
        for outcome in outcomes {
            collector.record(outcome, None);
        }
        let run = RunInfo {
            job_id: Uuid::new_v4(),
            started_at: Utc::now(),
            dry_run: false,
        };
        let reason = (state == RunState::Aborted).then(|| "cancelled".to_string());
        collector.summarize(&run, None, state, reason)
    }

    #[test]
    fn test_exit_codes() {
        let ok = summary(vec![Outcome::success(RecordId::new("ns", "a"), true)], RunState::Completed);
        assert_eq!(RunReport::new(ok, Path::new("r.json"), &Scope::All).exit_code(), EXIT_OK);

        let failed = summary(
            vec![Outcome::failed(RecordId::new("ns", "a"), ErrorKind::TransientStore)],
            RunState::Completed,
        );
        assert_eq!(
            RunReport::new(failed, Path::new("r.json"), &Scope::All).exit_code(),
            EXIT_FAILURES
        );

        let aborted = summary(vec![], RunState::Aborted);
        assert_eq!(
            RunReport::new(aborted, Path::new("r.json"), &Scope::All).exit_code(),
            EXIT_ABORTED
        );
    }

    #[test]
    fn test_write_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("report.json");
        let report = RunReport::new(
            summary(
                vec![Outcome::failed(RecordId::new("ns", "a"), ErrorKind::FatalAuth)],
                RunState::Completed,
            ),
            Path::new("records.json"),
            &Scope::Namespace("ns".to_string()),
        );
        report.write(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["scope"], "ns");
        assert_eq!(json["summary"]["failed"], 1);
        assert_eq!(json["summary"]["errors"][0]["identity"]["name"], "a");
    }
}
