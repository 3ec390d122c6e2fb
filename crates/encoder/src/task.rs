//! Per-file encode tasks and the events a run reports about them.

use crate::audiobook::{AudiobookSpec, SpecId};
use crate::preset::QualityPreset;
use crate::worker::EncodeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lifecycle of one chapter encode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source file of one audiobook, owned by the scheduler run that made it
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeTask {
    pub spec_id: SpecId,
    /// Zero-based chapter position within the audiobook
    pub index: usize,
    pub source: PathBuf,
    pub target: PathBuf,
    pub preset: QualityPreset,
    pub status: TaskStatus,
    /// Number of times the codec has been invoked for this task
    pub attempts: u8,
    pub error: Option<EncodeError>,
}

impl EncodeTask {
    pub fn new(spec_id: SpecId, index: usize, source: PathBuf, target: PathBuf, preset: QualityPreset) -> Self {
        Self {
            spec_id,
            index,
            source,
            target,
            preset,
            status: TaskStatus::Pending,
            attempts: 0,
            error: None,
        }
    }

    /// Expand an audiobook into its chapter tasks, in file order.
    pub fn for_spec(spec: &AudiobookSpec, output_extension: &str) -> Vec<EncodeTask> {
        let out_dir = spec.output_dir();
        let width = chapter_number_width(spec.files.len());
        spec.files
            .iter()
            .enumerate()
            .map(|(index, source)| {
                let target = chapter_target(&out_dir, index, width, source, output_extension);
                EncodeTask::new(spec.id, index, source.clone(), target, spec.preset)
            })
            .collect()
    }
}

/// Digits used for chapter numbers; at least three so short books sort the same way.
fn chapter_number_width(count: usize) -> usize {
    count.to_string().len().max(3)
}

/// `<out_dir>/<NNN> - <source stem>.<ext>`
fn chapter_target(out_dir: &Path, index: usize, width: usize, source: &Path, ext: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| crate::audiobook::sanitize_file_name(&s.to_string_lossy()))
        .unwrap_or_else(|| "chapter".to_string());
    out_dir.join(format!(
        "{:0width$} - {}.{}",
        index + 1,
        stem,
        ext.trim_start_matches('.'),
        width = width
    ))
}

/// What happened to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEventKind {
    /// An attempt was handed to a worker
    Started { attempt: u8 },
    /// The attempt failed and the task went back into the queue
    Retrying { error: EncodeError },
    Done,
    Failed { error: EncodeError },
}

/// Progress report for one task, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub spec_id: SpecId,
    pub index: usize,
    pub kind: TaskEventKind,
}

impl TaskEvent {
    /// Status the task is in after this event
    pub fn status(&self) -> TaskStatus {
        match self.kind {
            TaskEventKind::Started { .. } => TaskStatus::Running,
            TaskEventKind::Retrying { .. } => TaskStatus::Pending,
            TaskEventKind::Done => TaskStatus::Done,
            TaskEventKind::Failed { .. } => TaskStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audiobook::Metadata;

    #[test]
    fn test_task_status_as_str() {
        assert_eq!(TaskStatus::Pending.as_str(), "pending");
        assert_eq!(TaskStatus::Running.as_str(), "running");
        assert_eq!(TaskStatus::Done.as_str(), "done");
        assert_eq!(TaskStatus::Failed.as_str(), "failed");
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_tasks_follow_file_order() {
        let spec = AudiobookSpec::new(
            "Audiobook 2",
            vec![
                PathBuf::from("/src/AudiofileB 1.flac"),
                PathBuf::from("/src/AudiofileB 2.flac"),
                PathBuf::from("/src/AudiofileB 3.flac"),
            ],
            "/out",
        )
        .with_metadata(Metadata::titled("Book Two"))
        .with_preset(QualityPreset::Kbps256);

        let tasks = EncodeTask::for_spec(&spec, "m4a");
        assert_eq!(tasks.len(), 3);
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.index, i);
            assert_eq!(task.spec_id, spec.id);
            assert_eq!(task.source, spec.files[i]);
            assert_eq!(task.preset, QualityPreset::Kbps256);
            assert_eq!(task.status, TaskStatus::Pending);
            assert_eq!(task.attempts, 0);
        }
        assert_eq!(
            tasks[0].target,
            PathBuf::from("/out/Book Two/001 - AudiofileB 1.m4a")
        );
        assert_eq!(
            tasks[2].target,
            PathBuf::from("/out/Book Two/003 - AudiofileB 3.m4a")
        );
    }

    #[test]
    fn test_chapter_width_grows_with_book() {
        let files: Vec<PathBuf> = (1..=1200).map(|i| PathBuf::from(format!("{}.mp3", i))).collect();
        let spec = AudiobookSpec::new("Long", files, "/out");
        let tasks = EncodeTask::for_spec(&spec, ".m4b");
        assert_eq!(tasks[0].target, PathBuf::from("/out/Long/0001 - 1.m4b"));
        assert_eq!(tasks[1199].target, PathBuf::from("/out/Long/1200 - 1200.m4b"));
    }

    #[test]
    fn test_shared_stems_in_subfolders_get_distinct_targets() {
        let spec = AudiobookSpec::new(
            "Box Set",
            vec![PathBuf::from("/src/CD1/01.mp3"), PathBuf::from("/src/CD2/01.mp3")],
            "/out",
        );
        let tasks = EncodeTask::for_spec(&spec, "m4a");
        assert_eq!(tasks[0].target, PathBuf::from("/out/Box Set/001 - 01.m4a"));
        assert_eq!(tasks[1].target, PathBuf::from("/out/Box Set/002 - 01.m4a"));
    }

    #[test]
    fn test_event_status() {
        let id = SpecId::new();
        let event = |kind| TaskEvent { spec_id: id, index: 0, kind };
        assert_eq!(event(TaskEventKind::Started { attempt: 1 }).status(), TaskStatus::Running);
        assert_eq!(
            event(TaskEventKind::Retrying { error: EncodeError::CodecFailure(1) }).status(),
            TaskStatus::Pending
        );
        assert_eq!(event(TaskEventKind::Done).status(), TaskStatus::Done);
        assert_eq!(
            event(TaskEventKind::Failed { error: EncodeError::CodecFailure(1) }).status(),
            TaskStatus::Failed
        );
    }
}
