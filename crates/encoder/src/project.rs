//! Project file: the job queue persisted as JSON.

use crate::audiobook::AudiobookSpec;
use crate::queue::{JobQueue, QueueError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Current project file format version
pub const PROJECT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project file IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Project file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported project version {0}")]
    UnsupportedVersion(u32),

    #[error("Audiobook #{index} ({name}) in project file is invalid: {source}")]
    InvalidAudiobook {
        index: usize,
        name: String,
        #[source]
        source: QueueError,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct ProjectFile {
    version: u32,
    audiobooks: Vec<AudiobookSpec>,
}

/// Writes the queue to `path`, creating parent directories.
pub fn save_project(queue: &JobQueue, path: &Path) -> Result<(), ProjectError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = ProjectFile {
        version: PROJECT_VERSION,
        audiobooks: queue.iter().cloned().collect(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    fs::write(path, json)?;
    Ok(())
}

/// Loads a queue from `path`; a missing file is an empty project.
///
/// An entry that fails validation, or reuses an earlier entry's id, fails the
/// whole load. Nothing is dropped, so saving the queue back never loses data.
pub fn load_project(path: &Path) -> Result<JobQueue, ProjectError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(JobQueue::new()),
        Err(e) => return Err(e.into()),
    };

    let file: ProjectFile = serde_json::from_str(&content)?;
    if file.version != PROJECT_VERSION {
        return Err(ProjectError::UnsupportedVersion(file.version));
    }

    let mut queue = JobQueue::new();
    for (index, spec) in file.audiobooks.into_iter().enumerate() {
        let name = spec.name.clone();
        queue
            .add(spec)
            .map_err(|source| ProjectError::InvalidAudiobook { index, name, source })?;
    }
    tracing::debug!(path = %path.display(), audiobooks = queue.len(), "project loaded");
    Ok(queue)
}
