//! Encode scheduler
//!
//! Expands audiobooks into chapter tasks and runs them on a bounded worker
//! pool. Concurrency is limited by a semaphore shared by every run of the
//! same scheduler; codec calls run on tokio's blocking pool.
//!
//! Ordering rules:
//! - tasks are created per audiobook in input order, per chapter in file order
//! - ready tasks are dispatched FIFO by the time they became ready
//! - with [`ChapterOrdering::Sequential`] a chapter becomes ready only after
//!   the previous chapter of the same audiobook finished (done or failed)
//!
//! A failed attempt is queued again once; the second failure is final and
//! never affects other audiobooks. A chapter whose target path was already
//! claimed by an earlier task of the same run fails without being encoded. After cancellation nothing new is
//! dispatched, running encodes are allowed to finish.

use crate::audiobook::{AudiobookSpec, SpecId};
use crate::concurrency::{ChapterOrdering, ConcurrencyPlan};
use crate::task::{EncodeTask, TaskEvent, TaskEventKind, TaskStatus};
use crate::worker::{EncodeError, EncodeWorker};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Codec invocations per task: the first attempt plus one retry
pub const MAX_ATTEMPTS: u8 = 2;

/// Exit code recorded when the blocking encode call panicked
pub const WORKER_PANIC_CODE: i32 = -2;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler run aborted: {0}")]
    RunAborted(#[from] tokio::task::JoinError),
}

/// Final state of every task of one run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// All tasks, grouped by audiobook in input order, chapters in file order
    pub tasks: Vec<EncodeTask>,
    /// The run stopped early because of cancellation
    pub cancelled: bool,
}

impl RunReport {
    pub fn tasks_for(&self, spec_id: SpecId) -> impl Iterator<Item = &EncodeTask> {
        self.tasks.iter().filter(move |t| t.spec_id == spec_id)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

/// A run in progress: task events as they happen, then the report
pub struct RunHandle {
    pub events: mpsc::UnboundedReceiver<TaskEvent>,
    report: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Next task event; `None` once the run has finished
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        self.events.recv().await
    }

    /// Wait for the run to finish, discarding undelivered events
    pub async fn report(self) -> Result<RunReport, SchedulerError> {
        drop(self.events);
        Ok(self.report.await?)
    }

    /// Collect every event, then the report
    pub async fn finish(mut self) -> Result<(Vec<TaskEvent>, RunReport), SchedulerError> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let report = self.report.await?;
        Ok((events, report))
    }
}

/// Runs chapter encodes under a bounded worker pool
pub struct EncodeScheduler {
    worker: Arc<EncodeWorker>,
    semaphore: Arc<Semaphore>,
    plan: ConcurrencyPlan,
    output_extension: String,
}

impl EncodeScheduler {
    /// Create a scheduler
    ///
    /// # Arguments
    /// * `worker` - Worker that performs the per-file encode
    /// * `plan` - Pool size and chapter ordering
    /// * `output_extension` - Extension of the encoded chapter files
    pub fn new(worker: Arc<EncodeWorker>, plan: ConcurrencyPlan, output_extension: impl Into<String>) -> Self {
        let permits = plan.workers.max(1) as usize;
        Self {
            worker,
            semaphore: Arc::new(Semaphore::new(permits)),
            plan,
            output_extension: output_extension.into(),
        }
    }

    pub fn plan(&self) -> &ConcurrencyPlan {
        &self.plan
    }

    /// Worker slots not currently running an encode
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Start encoding `specs`; must be called inside a tokio runtime.
    pub fn run(&self, specs: &[AudiobookSpec], cancel: CancellationToken) -> RunHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatch = Dispatch::new(
            specs,
            &self.output_extension,
            self.plan.ordering,
            self.worker.clone(),
            self.semaphore.clone(),
            cancel,
            events_tx,
        );
        tracing::info!(
            audiobooks = specs.len(),
            tasks = dispatch.tasks.len(),
            workers = self.plan.workers,
            ordering = ?self.plan.ordering,
            "encode run started"
        );
        RunHandle {
            events: events_rx,
            report: tokio::spawn(dispatch.run()),
        }
    }
}

type Attempt = (usize, Result<(), EncodeError>);

/// State of one run, owned by its dispatcher task
struct Dispatch {
    tasks: Vec<EncodeTask>,
    /// Chapters waiting for their predecessor, per audiobook position in the
    /// run (sequential ordering only)
    held: Vec<VecDeque<usize>>,
    /// Audiobook position of each task
    book_of: Vec<usize>,
    /// Tasks ready to start, in the order they became ready
    ready: VecDeque<usize>,
    in_flight: JoinSet<Attempt>,
    worker: Arc<EncodeWorker>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    cancel_seen: bool,
    events: mpsc::UnboundedSender<TaskEvent>,
}

impl Dispatch {
    fn new(
        specs: &[AudiobookSpec],
        output_extension: &str,
        ordering: ChapterOrdering,
        worker: Arc<EncodeWorker>,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> Self {
        let mut tasks = Vec::new();
        let mut held = Vec::with_capacity(specs.len());
        let mut book_of = Vec::new();
        let mut ready = VecDeque::new();
        let mut targets = HashSet::new();

        for (book, spec) in specs.iter().enumerate() {
            let mut chapters = VecDeque::new();
            for mut task in EncodeTask::for_spec(spec, output_extension) {
                let index = tasks.len();
                if targets.insert(task.target.clone()) {
                    chapters.push_back(index);
                } else {
                    tracing::error!(
                        spec = %spec.id,
                        target = %task.target.display(),
                        "chapter target clashes with an earlier chapter of this run"
                    );
                    task.status = TaskStatus::Failed;
                    task.error = Some(EncodeError::unwritable(
                        &task.target,
                        "another chapter of this export writes the same file",
                    ));
                }
                tasks.push(task);
                book_of.push(book);
            }

            match ordering {
                ChapterOrdering::Interleaved => {
                    ready.extend(chapters);
                    held.push(VecDeque::new());
                }
                ChapterOrdering::Sequential => {
                    if let Some(head) = chapters.pop_front() {
                        ready.push_back(head);
                    }
                    held.push(chapters);
                }
            }
        }

        Self {
            tasks,
            held,
            book_of,
            ready,
            in_flight: JoinSet::new(),
            worker,
            semaphore,
            cancel,
            cancel_seen: false,
            events,
        }
    }

    async fn run(mut self) -> RunReport {
        // Tasks rejected while planning are reported before anything starts
        let rejected: Vec<TaskEvent> = self
            .tasks
            .iter()
            .filter_map(|t| {
                t.error.clone().map(|error| TaskEvent {
                    spec_id: t.spec_id,
                    index: t.index,
                    kind: TaskEventKind::Failed { error },
                })
            })
            .collect();
        for event in rejected {
            let _ = self.events.send(event);
        }

        loop {
            self.observe_cancel();

            // Fill free worker slots without waiting
            while !self.cancel_seen && !self.ready.is_empty() {
                match self.semaphore.clone().try_acquire_owned() {
                    Ok(permit) => self.start_next(permit),
                    Err(_) => break,
                }
                self.observe_cancel();
            }

            let can_start = !self.cancel_seen && !self.ready.is_empty();
            if self.in_flight.is_empty() && !can_start {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled(), if !self.cancel_seen => {}
                joined = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    match joined {
                        Some(Ok((index, result))) => self.complete(index, result),
                        Some(Err(e)) => tracing::error!(error = %e, "encode attempt wrapper failed"),
                        None => {}
                    }
                }
                permit = self.semaphore.clone().acquire_owned(), if can_start => {
                    match permit {
                        Ok(permit) => {
                            self.observe_cancel();
                            if !self.cancel_seen {
                                self.start_next(permit);
                            }
                        }
                        Err(_) => {
                            tracing::error!("worker pool closed, stopping run");
                            self.cancel_seen = true;
                        }
                    }
                }
            }
        }

        let cancelled = self.cancel_seen && self.tasks.iter().any(|t| !t.status.is_terminal());
        tracing::info!(
            done = self.tasks.iter().filter(|t| t.status == TaskStatus::Done).count(),
            failed = self.tasks.iter().filter(|t| t.status == TaskStatus::Failed).count(),
            cancelled,
            "encode run finished"
        );
        RunReport {
            tasks: self.tasks,
            cancelled,
        }
    }

    fn observe_cancel(&mut self) {
        if !self.cancel_seen && self.cancel.is_cancelled() {
            self.cancel_seen = true;
            tracing::info!(
                in_flight = self.in_flight.len(),
                not_started = self.ready.len() + self.held.iter().map(VecDeque::len).sum::<usize>(),
                "encode run cancelled, waiting for running encodes"
            );
        }
    }

    /// Hand the oldest ready task to a worker; the permit is held until it returns
    fn start_next(&mut self, permit: OwnedSemaphorePermit) {
        let Some(index) = self.ready.pop_front() else {
            return;
        };

        let task = &mut self.tasks[index];
        task.status = TaskStatus::Running;
        task.attempts += 1;
        let attempt = task.attempts;
        let snapshot = task.clone();
        tracing::debug!(
            spec = %snapshot.spec_id,
            chapter = index,
            attempt,
            source = %snapshot.source.display(),
            "dispatching chapter"
        );
        self.emit(&snapshot, TaskEventKind::Started { attempt });

        let worker = self.worker.clone();
        self.in_flight.spawn(async move {
            let _permit = permit;
            let result = tokio::task::spawn_blocking(move || worker.encode(&snapshot))
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "encode worker panicked");
                    Err(EncodeError::CodecFailure(WORKER_PANIC_CODE))
                });
            (index, result)
        });
    }

    fn complete(&mut self, index: usize, result: Result<(), EncodeError>) {
        let book = self.book_of[index];
        let task = &mut self.tasks[index];
        let spec_id = task.spec_id;

        match result {
            Ok(()) => {
                task.status = TaskStatus::Done;
                task.error = None;
                let snapshot = task.clone();
                self.emit(&snapshot, TaskEventKind::Done);
                self.release_next(book);
            }
            Err(error) if task.attempts < MAX_ATTEMPTS => {
                tracing::warn!(
                    spec = %spec_id,
                    source = %task.source.display(),
                    error = %error,
                    "chapter encode failed, retrying"
                );
                task.status = TaskStatus::Pending;
                let snapshot = task.clone();
                self.emit(&snapshot, TaskEventKind::Retrying { error });
                self.ready.push_back(index);
            }
            Err(error) => {
                tracing::error!(
                    spec = %spec_id,
                    source = %task.source.display(),
                    attempts = task.attempts,
                    error = %error,
                    "chapter encode failed"
                );
                task.status = TaskStatus::Failed;
                task.error = Some(error.clone());
                let snapshot = task.clone();
                self.emit(&snapshot, TaskEventKind::Failed { error });
                self.release_next(book);
            }
        }
    }

    /// Make the next held chapter of an audiobook ready
    fn release_next(&mut self, book: usize) {
        if let Some(next) = self.held.get_mut(book).and_then(VecDeque::pop_front) {
            self.ready.push_back(next);
        }
    }

    fn emit(&self, task: &EncodeTask, kind: TaskEventKind) {
        // A closed receiver only means nobody is watching progress
        let _ = self.events.send(TaskEvent {
            spec_id: task.spec_id,
            index: task.index,
            kind,
        });
    }
}
