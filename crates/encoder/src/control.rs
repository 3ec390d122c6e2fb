//! Control loop
//!
//! A single task owns the [`JobQueue`] and serves [`Command`]s sent through
//! a [`ControlHandle`]. Exports are planned on the loop and executed on a
//! spawned task so the loop keeps answering (snapshots, cancel) while
//! chapters encode. At most one export runs at a time.

use crate::audiobook::{AudiobookSpec, Metadata, SpecId, ValidationError};
use crate::export::{ExportController, ExportError, ExportSummary};
use crate::preset::QualityPreset;
use crate::queue::{JobQueue, QueueError};
use crate::scheduler::SchedulerError;
use crate::task::TaskEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Commands buffered before senders wait
const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("An export is already running")]
    ExportInProgress,

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Control loop is closed")]
    Closed,
}

impl From<ValidationError> for ControlError {
    fn from(e: ValidationError) -> Self {
        ControlError::Queue(QueueError::Validation(e))
    }
}

/// Read-only projection of an audiobook for the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudiobookView {
    pub id: SpecId,
    pub name: String,
    pub title: String,
    pub author: String,
    pub files: usize,
    pub preset: QualityPreset,
    pub destination: PathBuf,
    pub active: bool,
}

impl From<&AudiobookSpec> for AudiobookView {
    fn from(spec: &AudiobookSpec) -> Self {
        Self {
            id: spec.id,
            name: spec.name.clone(),
            title: spec.metadata.title.clone(),
            author: spec.metadata.author.clone(),
            files: spec.files.len(),
            preset: spec.preset,
            destination: spec.destination.clone(),
            active: spec.active,
        }
    }
}

pub type Reply<T> = oneshot::Sender<Result<T, ControlError>>;

pub enum Command {
    Add {
        spec: AudiobookSpec,
        reply: Reply<SpecId>,
    },
    Remove {
        id: SpecId,
        reply: Reply<AudiobookSpec>,
    },
    SetActive {
        id: SpecId,
        active: bool,
        reply: Reply<()>,
    },
    UpdateMetadata {
        id: SpecId,
        metadata: Metadata,
        reply: Reply<()>,
    },
    SetPreset {
        id: SpecId,
        preset: QualityPreset,
        reply: Reply<()>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<AudiobookView>>,
    },
    Export {
        selection: HashSet<SpecId>,
        preset_override: Option<QualityPreset>,
        progress: Option<mpsc::UnboundedSender<TaskEvent>>,
        accepted: Reply<()>,
        done: Reply<ExportSummary>,
    },
    /// Replies `true` when an export was running
    CancelExport {
        reply: oneshot::Sender<bool>,
    },
}

struct RunningExport {
    cancel: CancellationToken,
    task: JoinHandle<Result<ExportSummary, ExportError>>,
    done: Reply<ExportSummary>,
}

/// Owner of the job queue; see the module docs
pub struct ControlLoop {
    queue: JobQueue,
    controller: Arc<ExportController>,
    shutdown: CancellationToken,
    commands: mpsc::Receiver<Command>,
    export: Option<RunningExport>,
}

impl ControlLoop {
    /// Create the loop and its first handle.
    ///
    /// Cancelling `shutdown` cancels any export started by this loop.
    pub fn new(
        queue: JobQueue,
        controller: Arc<ExportController>,
        shutdown: CancellationToken,
    ) -> (Self, ControlHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let control = Self {
            queue,
            controller,
            shutdown,
            commands: rx,
            export: None,
        };
        (control, ControlHandle { tx })
    }

    /// Serve commands until every handle is dropped, then return the queue.
    ///
    /// A running export is awaited before returning.
    pub async fn run(mut self) -> JobQueue {
        loop {
            tokio::select! {
                biased;
                finished = export_finished(&mut self.export) => self.finish_export(finished),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        if self.export.is_some() {
            let finished = export_finished(&mut self.export).await;
            self.finish_export(finished);
        }
        tracing::debug!(audiobooks = self.queue.len(), "control loop stopped");
        self.queue
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Add { spec, reply } => {
                let _ = reply.send(self.queue.add(spec).map_err(ControlError::from));
            }
            Command::Remove { id, reply } => {
                let _ = reply.send(self.queue.remove(id).map_err(ControlError::from));
            }
            Command::SetActive { id, active, reply } => {
                let _ = reply.send(self.queue.set_active(id, active).map_err(ControlError::from));
            }
            Command::UpdateMetadata { id, metadata, reply } => {
                let _ = reply.send(self.queue.update_metadata(id, metadata).map_err(ControlError::from));
            }
            Command::SetPreset { id, preset, reply } => {
                let _ = reply.send(self.queue.set_preset(id, preset).map_err(ControlError::from));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.queue.iter().map(AudiobookView::from).collect());
            }
            Command::Export {
                selection,
                preset_override,
                progress,
                accepted,
                done,
            } => self.start_export(selection, preset_override, progress, accepted, done),
            Command::CancelExport { reply } => {
                let running = match &self.export {
                    Some(export) => {
                        tracing::info!("export cancellation requested");
                        export.cancel.cancel();
                        true
                    }
                    None => false,
                };
                let _ = reply.send(running);
            }
        }
    }

    fn start_export(
        &mut self,
        selection: HashSet<SpecId>,
        preset_override: Option<QualityPreset>,
        progress: Option<mpsc::UnboundedSender<TaskEvent>>,
        accepted: Reply<()>,
        done: Reply<ExportSummary>,
    ) {
        if self.export.is_some() {
            let _ = accepted.send(Err(ControlError::ExportInProgress));
            return;
        }

        let plan = ExportController::plan(&self.queue, &selection, preset_override);
        let cancel = self.shutdown.child_token();
        let controller = self.controller.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { controller.run_plan(plan, token, progress).await });

        self.export = Some(RunningExport { cancel, task, done });
        let _ = accepted.send(Ok(()));
    }

    fn finish_export(&mut self, finished: Result<ExportSummary, ControlError>) {
        if let Some(export) = self.export.take() {
            let _ = export.done.send(finished);
        }
    }
}

/// Resolves when the running export task ends; pending when none runs
async fn export_finished(export: &mut Option<RunningExport>) -> Result<ExportSummary, ControlError> {
    match export {
        Some(running) => match (&mut running.task).await {
            Ok(result) => result.map_err(ControlError::from),
            Err(join) => Err(ControlError::Export(ExportError::Scheduler(
                SchedulerError::RunAborted(join),
            ))),
        },
        None => std::future::pending().await,
    }
}

/// An accepted export; resolves to its summary
#[derive(Debug)]
pub struct ExportTicket {
    done: oneshot::Receiver<Result<ExportSummary, ControlError>>,
}

impl ExportTicket {
    pub async fn wait(self) -> Result<ExportSummary, ControlError> {
        self.done.await.map_err(|_| ControlError::Closed)?
    }
}

/// Cloneable sender side of the control loop
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<Command>,
}

impl ControlHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| ControlError::Closed)?;
        rx.await.map_err(|_| ControlError::Closed)
    }

    pub async fn add(&self, spec: AudiobookSpec) -> Result<SpecId, ControlError> {
        self.request(|reply| Command::Add { spec, reply }).await?
    }

    pub async fn remove(&self, id: SpecId) -> Result<AudiobookSpec, ControlError> {
        self.request(|reply| Command::Remove { id, reply }).await?
    }

    pub async fn set_active(&self, id: SpecId, active: bool) -> Result<(), ControlError> {
        self.request(|reply| Command::SetActive { id, active, reply }).await?
    }

    pub async fn update_metadata(&self, id: SpecId, metadata: Metadata) -> Result<(), ControlError> {
        self.request(|reply| Command::UpdateMetadata { id, metadata, reply })
            .await?
    }

    pub async fn set_preset(&self, id: SpecId, preset: QualityPreset) -> Result<(), ControlError> {
        self.request(|reply| Command::SetPreset { id, preset, reply }).await?
    }

    pub async fn snapshot(&self) -> Result<Vec<AudiobookView>, ControlError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Queue an export; returns once the loop accepted or refused it
    pub async fn start_export(
        &self,
        selection: HashSet<SpecId>,
        preset_override: Option<QualityPreset>,
        progress: Option<mpsc::UnboundedSender<TaskEvent>>,
    ) -> Result<ExportTicket, ControlError> {
        let (done, done_rx) = oneshot::channel();
        self.request(|accepted| Command::Export {
            selection,
            preset_override,
            progress,
            accepted,
            done,
        })
        .await??;
        Ok(ExportTicket { done: done_rx })
    }

    pub async fn export(
        &self,
        selection: HashSet<SpecId>,
        preset_override: Option<QualityPreset>,
        progress: Option<mpsc::UnboundedSender<TaskEvent>>,
    ) -> Result<ExportSummary, ControlError> {
        self.start_export(selection, preset_override, progress)
            .await?
            .wait()
            .await
    }

    pub async fn cancel_export(&self) -> Result<bool, ControlError> {
        self.request(|reply| Command::CancelExport { reply }).await
    }
}
