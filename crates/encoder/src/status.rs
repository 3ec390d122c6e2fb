//! Export status snapshot shared between the export controller and the
//! status endpoint.

use crate::export::ExportSummary;
use crate::task::{TaskEvent, TaskEventKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Live progress of the current (or last) export
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExportStatus {
    pub timestamp_unix_ms: i64,
    pub running: bool,
    pub audiobooks: usize,
    pub tasks_total: usize,
    pub tasks_running: usize,
    pub tasks_done: usize,
    pub tasks_failed: usize,
    pub retries: u64,
    pub last_summary: Option<ExportSummary>,
}

impl ExportStatus {
    /// Reset counters for a new export of `audiobooks` books with `tasks` chapters
    pub fn begin(&mut self, audiobooks: usize, tasks: usize) {
        self.running = true;
        self.audiobooks = audiobooks;
        self.tasks_total = tasks;
        self.tasks_running = 0;
        self.tasks_done = 0;
        self.tasks_failed = 0;
        self.retries = 0;
        self.touch();
    }

    /// Fold one task event into the counters
    pub fn apply(&mut self, event: &TaskEvent) {
        match event.kind {
            TaskEventKind::Started { .. } => self.tasks_running += 1,
            TaskEventKind::Retrying { .. } => {
                self.tasks_running = self.tasks_running.saturating_sub(1);
                self.retries += 1;
            }
            TaskEventKind::Done => {
                self.tasks_running = self.tasks_running.saturating_sub(1);
                self.tasks_done += 1;
            }
            TaskEventKind::Failed { .. } => {
                self.tasks_running = self.tasks_running.saturating_sub(1);
                self.tasks_failed += 1;
            }
        }
        self.touch();
    }

    pub fn finish(&mut self, summary: ExportSummary) {
        self.running = false;
        self.tasks_running = 0;
        self.last_summary = Some(summary);
        self.touch();
    }

    fn touch(&mut self) {
        self.timestamp_unix_ms = now_unix_ms();
    }
}

pub type SharedStatus = Arc<RwLock<ExportStatus>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(RwLock::new(ExportStatus::default()))
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
