//! Export controller
//!
//! Turns a queue selection into a scheduler run and folds the outcome of
//! every chapter into one [`ExportResult`] per audiobook.

use crate::audiobook::{AudiobookSpec, SpecId};
use crate::concurrency::ConcurrencyPlan;
use crate::config::Config;
use crate::encode::FfmpegCodec;
use crate::preset::QualityPreset;
use crate::queue::JobQueue;
use crate::scheduler::{EncodeScheduler, RunReport, SchedulerError};
use crate::status::SharedStatus;
use crate::task::{TaskEvent, TaskStatus};
use crate::worker::{EncodeError, EncodeWorker};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// How one audiobook's export ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportOutcome {
    /// Every chapter was encoded
    Succeeded,
    /// At least one chapter failed after its retry
    PartiallyFailed,
    /// Cancelled before every chapter ran, nothing failed
    Incomplete,
}

/// A chapter that could not be encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterFailure {
    pub index: usize,
    pub source: PathBuf,
    pub error: EncodeError,
}

/// Per-audiobook result of one export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub id: SpecId,
    pub name: String,
    pub total: usize,
    pub succeeded: usize,
    pub failures: Vec<ChapterFailure>,
    pub outcome: ExportOutcome,
}

impl ExportResult {
    fn from_report(spec: &AudiobookSpec, report: &RunReport) -> Self {
        let mut total = 0;
        let mut succeeded = 0;
        let mut failures = Vec::new();

        for task in report.tasks_for(spec.id) {
            total += 1;
            match task.status {
                TaskStatus::Done => succeeded += 1,
                TaskStatus::Failed => failures.push(ChapterFailure {
                    index: task.index,
                    source: task.source.clone(),
                    error: task
                        .error
                        .clone()
                        .unwrap_or(EncodeError::CodecFailure(crate::scheduler::WORKER_PANIC_CODE)),
                }),
                TaskStatus::Pending | TaskStatus::Running => {}
            }
        }

        let outcome = if !failures.is_empty() {
            ExportOutcome::PartiallyFailed
        } else if succeeded == total {
            ExportOutcome::Succeeded
        } else {
            ExportOutcome::Incomplete
        };

        Self {
            id: spec.id,
            name: spec.name.clone(),
            total,
            succeeded,
            failures,
            outcome,
        }
    }
}

/// Aggregate result of one export invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Audiobooks that took part in the export
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub incomplete: usize,
    pub cancelled: bool,
    /// Per-audiobook detail in queue order
    pub results: Vec<ExportResult>,
}

impl ExportSummary {
    fn from_results(results: Vec<ExportResult>, cancelled: bool) -> Self {
        let count = |outcome: ExportOutcome| results.iter().filter(|r| r.outcome == outcome).count();
        Self {
            total: results.len(),
            succeeded: count(ExportOutcome::Succeeded),
            failed: count(ExportOutcome::PartiallyFailed),
            incomplete: count(ExportOutcome::Incomplete),
            cancelled,
            results,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.incomplete == 0 && !self.cancelled
    }

    pub fn result_for(&self, id: SpecId) -> Option<&ExportResult> {
        self.results.iter().find(|r| r.id == id)
    }
}

/// Audiobooks chosen for one export, detached from the queue
#[derive(Debug, Clone, Default)]
pub struct ExportPlan {
    specs: Vec<AudiobookSpec>,
}

impl ExportPlan {
    pub fn specs(&self) -> &[AudiobookSpec] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.specs.iter().map(|s| s.files.len()).sum()
    }
}

/// Drives export runs on a shared scheduler and publishes their progress
pub struct ExportController {
    scheduler: Arc<EncodeScheduler>,
    status: SharedStatus,
}

impl ExportController {
    pub fn new(scheduler: Arc<EncodeScheduler>, status: SharedStatus) -> Self {
        Self { scheduler, status }
    }

    /// Wire an ffmpeg-backed scheduler from configuration
    ///
    /// 1. Builds the codec from `[encoder]`
    /// 2. Sizes the worker pool from `plan`
    /// 3. Shares `status` with whoever serves it
    pub fn from_config(cfg: &Config, plan: ConcurrencyPlan, status: SharedStatus) -> Self {
        let codec = FfmpegCodec::new(&cfg.encoder.ffmpeg_path, cfg.encoder.audio_codec.clone());
        let worker = Arc::new(EncodeWorker::new(Arc::new(codec)));
        let scheduler = EncodeScheduler::new(worker, plan, cfg.encoder.output_extension.clone());
        Self::new(Arc::new(scheduler), status)
    }

    pub fn concurrency(&self) -> &ConcurrencyPlan {
        self.scheduler.plan()
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Select the active audiobooks of `selection`, in queue order.
    ///
    /// Inactive audiobooks are dropped without error. `preset_override`
    /// replaces the preset of the planned copies only; the queue is untouched.
    pub fn plan(
        queue: &JobQueue,
        selection: &HashSet<SpecId>,
        preset_override: Option<QualityPreset>,
    ) -> ExportPlan {
        let specs = queue
            .selected(selection)
            .into_iter()
            .filter(|spec| {
                if !spec.active {
                    tracing::debug!(audiobook = %spec.name, "skipping inactive audiobook");
                }
                spec.active
            })
            .map(|spec| {
                let mut spec = spec.clone();
                if let Some(preset) = preset_override {
                    spec.preset = preset;
                }
                spec
            })
            .collect();
        ExportPlan { specs }
    }

    /// Run a plan to completion (or cancellation).
    ///
    /// Task events are folded into the shared status and forwarded to
    /// `progress` when given; a closed progress receiver is ignored.
    pub async fn run_plan(
        &self,
        plan: ExportPlan,
        cancel: CancellationToken,
        progress: Option<mpsc::UnboundedSender<TaskEvent>>,
    ) -> Result<ExportSummary, ExportError> {
        tracing::info!(
            audiobooks = plan.specs.len(),
            chapters = plan.task_count(),
            "export started"
        );
        self.status.write().await.begin(plan.specs.len(), plan.task_count());

        let mut handle = self.scheduler.run(&plan.specs, cancel);
        while let Some(event) = handle.next_event().await {
            self.status.write().await.apply(&event);
            if let Some(sink) = &progress {
                let _ = sink.send(event);
            }
        }

        let report = match handle.report().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "export run aborted");
                self.status.write().await.running = false;
                return Err(e.into());
            }
        };

        let results = plan
            .specs
            .iter()
            .map(|spec| ExportResult::from_report(spec, &report))
            .collect();
        let summary = ExportSummary::from_results(results, report.cancelled);

        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            incomplete = summary.incomplete,
            cancelled = summary.cancelled,
            "export finished"
        );
        self.status.write().await.finish(summary.clone());
        Ok(summary)
    }

    /// Plan and run in one step
    pub async fn export(
        &self,
        queue: &JobQueue,
        selection: &HashSet<SpecId>,
        preset_override: Option<QualityPreset>,
        cancel: CancellationToken,
        progress: Option<mpsc::UnboundedSender<TaskEvent>>,
    ) -> Result<ExportSummary, ExportError> {
        let plan = Self::plan(queue, selection, preset_override);
        self.run_plan(plan, cancel, progress).await
    }
}
