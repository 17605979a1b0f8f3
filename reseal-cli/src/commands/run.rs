use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use reseal_core::checkpoint::{load_checkpoint, save_checkpoint, JobCheckpoint};
use reseal_core::{
    FileKeySource, JobConfig, JsonFileStore, LabelSelector, Orchestrator, RecordEvent, RecordId,
    ResealConfig, RotationError, Scope,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::report::RunReport;

/// Events between two progress checkpoints
const CHECKPOINT_EVERY: u64 = 50;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Key-material file (JSON)
    #[arg(long)]
    pub keys: PathBuf,

    /// Records file (JSON)
    #[arg(long)]
    pub store: PathBuf,

    /// Namespace to process, or "all"
    #[arg(long)]
    pub scope: Option<String>,

    /// Label selector, e.g. "team=payments,tier=prod"
    #[arg(long)]
    pub selector: Option<String>,

    /// Validate every record without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Number of concurrent workers
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Skip records up to and including this namespace/name
    #[arg(long, conflicts_with = "resume")]
    pub resume_cursor: Option<String>,

    /// Continue from the cursor stored in the checkpoint
    #[arg(long)]
    pub resume: bool,

    /// Directory holding the run checkpoint
    #[arg(long, default_value = ".reseal")]
    pub checkpoint_dir: PathBuf,

    /// Write a JSON report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Merge the config file, command-line overrides and checkpoint into a job
pub fn build_job_config(
    config: &ResealConfig,
    args: &RunArgs,
    checkpoint: &JobCheckpoint,
) -> Result<JobConfig> {
    let mut job = config.job_config()?;

    if let Some(scope) = &args.scope {
        job.scope = scope
            .parse::<Scope>()
            .map_err(|e| anyhow!("Invalid scope: {}", e))?;
    }
    if let Some(selector) = &args.selector {
        let selector = selector
            .parse::<LabelSelector>()
            .map_err(|e| anyhow!("Invalid label selector: {}", e))?;
        job = job.with_label_selector(selector);
    }
    if let Some(concurrency) = args.concurrency {
        job = job.with_concurrency(concurrency);
    }
    if args.dry_run {
        job = job.with_dry_run(true);
    }

    let cursor = match &args.resume_cursor {
        Some(cursor) => Some(
            cursor
                .parse::<RecordId>()
                .map_err(|e| anyhow!("Invalid resume cursor: {}", e))?,
        ),
        None if args.resume => match checkpoint {
            JobCheckpoint::InProgress { .. } | JobCheckpoint::Aborted { .. } => {
                checkpoint.resume_cursor().cloned()
            }
            _ => {
                warn!("No interrupted run to resume, starting from the beginning");
                None
            }
        },
        None => None,
    };
    job = job.with_resume_cursor(cursor);

    job.validate().context("Invalid job configuration")?;
    Ok(job)
}

pub async fn execute_run(config: &ResealConfig, args: RunArgs) -> Result<u8> {
    let checkpoint = load_checkpoint(&args.checkpoint_dir)?;
    let job = build_job_config(config, &args, &checkpoint)?.with_job_id(Uuid::new_v4());

    if !args.resume && args.resume_cursor.is_none() && !checkpoint.can_start_fresh() {
        warn!(
            previous = ?checkpoint.job_id(),
            "An interrupted run exists; starting over. Pass --resume to continue it instead"
        );
    }
    if job.dry_run {
        info!("Running in dry-run mode - no records or checkpoints will be written");
    }

    let store = Arc::new(JsonFileStore::open(&args.store)?);
    let key_source = Arc::new(FileKeySource::new(&args.keys));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(store.clone(), key_source).with_event_sink(events_tx);

    let cancel = orchestrator.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, draining in-flight records");
            cancel.cancel();
        }
    });

    let progress = ProgressCheckpointer {
        sink: (!job.dry_run).then(|| ProgressSink {
            dir: args.checkpoint_dir.clone(),
            store: store.clone(),
        }),
        job_id: job.job_id.unwrap_or_default(),
        started_at: Utc::now(),
        scope: job.scope.to_string(),
        dry_run: job.dry_run,
    };
    let progress = tokio::spawn(progress.run(events_rx));

    let result = orchestrator.run(&job).await;
    interrupt.abort();
    // Closes the event stream so the progress task finishes
    drop(orchestrator);
    if let Err(e) = progress.await {
        warn!(error = %e, "Progress task failed");
    }

    let summary = match result {
        Ok(summary) => summary,
        Err(RotationError::RunAborted {
            kind,
            reason,
            summary,
        }) => {
            error!(%kind, %reason, "Run aborted");
            *summary
        }
        Err(e) => return Err(e).context("Run could not start"),
    };

    if !summary.dry_run {
        store
            .flush()
            .with_context(|| format!("Failed to write records back to {}", args.store.display()))?;
        save_checkpoint(&args.checkpoint_dir, &JobCheckpoint::from_summary(&summary))?;
    }

    let report = RunReport::new(summary, &args.store, &job.scope);
    report.print();
    if let Some(path) = &args.report {
        report.write(path)?;
        info!(path = %path.display(), "Report written");
    }

    Ok(report.exit_code())
}

/// Where progress is persisted during a live run
struct ProgressSink {
    dir: PathBuf,
    store: Arc<JsonFileStore>,
}

/// Consumes the event stream, logging progress and saving the cursor
///
/// A cursor only reaches disk after the records it covers do: the store
/// is flushed first and the checkpoint is skipped if that flush fails.
struct ProgressCheckpointer {
    /// `None` disables checkpoint writes
    sink: Option<ProgressSink>,
    job_id: Uuid,
    started_at: DateTime<Utc>,
    scope: String,
    dry_run: bool,
}

impl ProgressCheckpointer {
    async fn run(self, mut events: mpsc::UnboundedReceiver<RecordEvent>) -> u64 {
        let mut processed = 0u64;
        let mut cursor = None;

        while let Some(event) = events.recv().await {
            processed += 1;
            cursor = event.resume_cursor;

            if processed % CHECKPOINT_EVERY == 0 {
                info!(
                    processed,
                    cursor = ?cursor.as_ref().map(ToString::to_string),
                    "Progress"
                );
                if let Some(sink) = &self.sink {
                    self.save(sink, cursor.clone(), processed);
                }
            }
        }
        processed
    }

    fn save(&self, sink: &ProgressSink, resume_cursor: Option<RecordId>, processed: u64) {
        if let Err(e) = sink.store.flush() {
            warn!(error = %e, "Failed to write records back, keeping previous checkpoint");
            return;
        }

        let state = JobCheckpoint::InProgress {
            job_id: self.job_id,
            started_at: self.started_at,
            scope: self.scope.clone(),
            dry_run: self.dry_run,
            resume_cursor,
            processed,
        };
        if let Err(e) = save_checkpoint(&sink.dir, &state) {
            warn!(error = %e, "Failed to save progress checkpoint");
        }
    }
}
