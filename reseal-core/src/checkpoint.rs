//! Persisted run checkpoint
//!
//! The pipeline itself owns no persisted state. Callers store the resume
//! cursor here between invocations so an interrupted run can continue
//! where it left off.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::outcome::JobSummary;
use crate::record::RecordId;

/// Checkpoint file name inside the checkpoint directory
pub const CHECKPOINT_FILE: &str = "reseal_checkpoint.json";

/// Run checkpoint state machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "state", content = "data")]
pub enum JobCheckpoint {
    /// No run recorded
    #[default]
    Idle,

    /// Run started and not yet finished
    InProgress {
        job_id: Uuid,
        started_at: DateTime<Utc>,
        scope: String,
        dry_run: bool,
        /// Every record up to and including this identity is resolved
        resume_cursor: Option<RecordId>,
        processed: u64,
    },

    /// Run finished with every record resolved
    Completed {
        job_id: Uuid,
        completed_at: DateTime<Utc>,
        succeeded: u64,
        skipped: u64,
        failed: u64,
    },

    /// Run stopped early
    Aborted {
        job_id: Uuid,
        reason: String,
        aborted_at: DateTime<Utc>,
        resume_cursor: Option<RecordId>,
    },
}

impl JobCheckpoint {
    pub fn is_idle(&self) -> bool {
        matches!(self, JobCheckpoint::Idle)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, JobCheckpoint::InProgress { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobCheckpoint::Completed { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, JobCheckpoint::Aborted { .. })
    }

    /// Only Idle and Completed allow a fresh run without resuming
    pub fn can_start_fresh(&self) -> bool {
        matches!(self, JobCheckpoint::Idle | JobCheckpoint::Completed { .. })
    }

    /// Cursor to resume from, if the last run was interrupted
    pub fn resume_cursor(&self) -> Option<&RecordId> {
        match self {
            JobCheckpoint::InProgress { resume_cursor, .. } => resume_cursor.as_ref(),
            JobCheckpoint::Aborted { resume_cursor, .. } => resume_cursor.as_ref(),
            _ => None,
        }
    }

    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            JobCheckpoint::Idle => None,
            JobCheckpoint::InProgress { job_id, .. }
            | JobCheckpoint::Completed { job_id, .. }
            | JobCheckpoint::Aborted { job_id, .. } => Some(*job_id),
        }
    }

    /// Terminal checkpoint for a finished run
    pub fn from_summary(summary: &JobSummary) -> Self {
        match &summary.abort_reason {
            None if summary.is_complete() => JobCheckpoint::Completed {
                job_id: summary.job_id,
                completed_at: Utc::now(),
                succeeded: summary.succeeded,
                skipped: summary.skipped,
                failed: summary.failed,
            },
            reason => JobCheckpoint::Aborted {
                job_id: summary.job_id,
                reason: reason.clone().unwrap_or_else(|| "interrupted".to_string()),
                aborted_at: Utc::now(),
                resume_cursor: summary.resume_cursor.clone(),
            },
        }
    }
}

/// Save checkpoint atomically (temp file, then rename)
pub fn save_checkpoint(dir: &Path, state: &JobCheckpoint) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create checkpoint directory: {}", dir.display()))?;

    let path = dir.join(CHECKPOINT_FILE);
    let json = serde_json::to_string_pretty(state).context("Failed to serialize checkpoint")?;

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, json)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    fs::rename(&temp_path, &path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    debug!(?state, "Saved checkpoint");
    Ok(())
}

/// Load checkpoint; Idle when no file exists
pub fn load_checkpoint(dir: &Path) -> Result<JobCheckpoint> {
    let path = dir.join(CHECKPOINT_FILE);

    if !path.exists() {
        debug!("No checkpoint file found, returning Idle");
        return Ok(JobCheckpoint::Idle);
    }

    let json = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
    let state: JobCheckpoint = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))?;

    debug!(?state, "Loaded checkpoint");
    Ok(state)
}

/// Delete the checkpoint file
pub fn clear_checkpoint(dir: &Path) -> Result<()> {
    let path = dir.join(CHECKPOINT_FILE);

    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove checkpoint: {}", path.display()))?;
        info!("Cleared checkpoint file");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{OutcomeCollector, RunInfo, RunState};
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_checkpoint() {
        let temp_dir = TempDir::new().unwrap();

        let state = JobCheckpoint::InProgress {
            job_id: Uuid::new_v4(),
            started_at: Utc::now(),
            scope: "payments".to_string(),
            dry_run: false,
            resume_cursor: Some(RecordId::new("payments", "db-password")),
            processed: 42,
        };

        save_checkpoint(temp_dir.path(), &state).unwrap();
        let loaded = load_checkpoint(temp_dir.path()).unwrap();
        assert_eq!(state, loaded);
        assert_eq!(
            loaded.resume_cursor(),
            Some(&RecordId::new("payments", "db-password"))
        );
        assert!(!loaded.can_start_fresh());
    }

    #[test]
    fn test_load_nonexistent_returns_idle() {
        let temp_dir = TempDir::new().unwrap();
        let state = load_checkpoint(temp_dir.path()).unwrap();
        assert!(state.is_idle());
        assert!(state.can_start_fresh());
    }

    #[test]
    fn test_clear_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        save_checkpoint(temp_dir.path(), &JobCheckpoint::Idle).unwrap();
        assert!(temp_dir.path().join(CHECKPOINT_FILE).exists());

        clear_checkpoint(temp_dir.path()).unwrap();
        assert!(!temp_dir.path().join(CHECKPOINT_FILE).exists());

        // Clearing twice is fine
        clear_checkpoint(temp_dir.path()).unwrap();
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(JobCheckpoint::Idle).unwrap();
        assert_eq!(json["state"], "Idle");
    }

    #[test]
    fn test_from_summary() {
        let collector = OutcomeCollector::new(None);
        let run = RunInfo {
            job_id: Uuid::new_v4(),
            started_at: Utc::now(),
            dry_run: false,
        };

        let completed = collector.summarize(&run, None, RunState::Completed, None);
        assert!(JobCheckpoint::from_summary(&completed).is_completed());

        let cursor = Some(RecordId::new("ns", "b"));
        let aborted = collector.summarize(
            &run,
            cursor.clone(),
            RunState::Aborted,
            Some("cancelled".to_string()),
        );
        let checkpoint = JobCheckpoint::from_summary(&aborted);
        assert!(checkpoint.is_aborted());
        assert_eq!(checkpoint.resume_cursor(), cursor.as_ref());
        assert_eq!(checkpoint.job_id(), Some(run.job_id));
    }
}
