//! Encode worker: turns one [`EncodeTask`] into one output file.

use crate::encode::Codec;
use crate::scan::is_audio_file;
use crate::task::EncodeTask;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Why a single chapter could not be encoded
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum EncodeError {
    #[error("Cannot read source {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Unsupported source format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Codec failed with code {0}")]
    CodecFailure(i32),

    #[error("Cannot write {path}: {reason}")]
    DestinationWriteError { path: PathBuf, reason: String },
}

impl EncodeError {
    fn unreadable(path: &Path, reason: impl ToString) -> Self {
        EncodeError::SourceUnreadable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unwritable(path: &Path, reason: impl ToString) -> Self {
        EncodeError::DestinationWriteError {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Runs the codec for a task and guards the filesystem around it.
///
/// `encode` blocks for the duration of the codec call; the scheduler runs it
/// on the blocking thread pool.
pub struct EncodeWorker {
    codec: Arc<dyn Codec>,
}

impl EncodeWorker {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }

    /// Encode one task
    ///
    /// 1. Rejects sources without a supported audio extension
    /// 2. Checks the source can be opened
    /// 3. Creates the target directory
    /// 4. Reserves the target; an existing file is never touched
    /// 5. Runs the codec into a hidden sibling file next to the target
    /// 6. Validates the output has content and moves it onto the reservation
    ///
    /// On failure only the reservation and the sibling file are removed.
    pub fn encode(&self, task: &EncodeTask) -> Result<(), EncodeError> {
        let source = task.source.as_path();
        let target = task.target.as_path();

        if !is_audio_file(source) {
            return Err(EncodeError::UnsupportedFormat {
                path: source.to_path_buf(),
            });
        }

        let metadata = fs::metadata(source).map_err(|e| EncodeError::unreadable(source, e))?;
        if !metadata.is_file() {
            return Err(EncodeError::unreadable(source, "not a regular file"));
        }
        File::open(source).map_err(|e| EncodeError::unreadable(source, e))?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| EncodeError::unwritable(parent, e))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(target) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(EncodeError::unwritable(target, "target already exists"));
            }
            Err(e) => return Err(EncodeError::unwritable(target, e)),
        }

        let staging = staging_path(target);
        let result = self.encode_reserved(task, &staging);
        remove_partial(&staging);
        if result.is_err() {
            remove_partial(target);
        }
        result
    }

    /// Codec run for a task whose target is reserved by this call
    fn encode_reserved(&self, task: &EncodeTask, staging: &Path) -> Result<(), EncodeError> {
        // A leftover from an interrupted run; the reservation makes it ours
        remove_partial(staging);

        tracing::debug!(
            source = %task.source.display(),
            target = %task.target.display(),
            preset = %task.preset,
            "transcoding chapter"
        );

        self.codec
            .transcode(&task.source, staging, task.preset)
            .map_err(|codec_err| EncodeError::CodecFailure(codec_err.code))?;

        match fs::metadata(staging) {
            Ok(m) if m.len() > 0 => {}
            Ok(_) => return Err(EncodeError::unwritable(&task.target, "codec produced an empty file")),
            Err(e) => return Err(EncodeError::unwritable(&task.target, format!("output missing: {}", e))),
        }

        fs::rename(staging, &task.target).map_err(|e| EncodeError::unwritable(&task.target, e))
    }
}

/// `<dir>/.partial-<file name>`; keeps the extension the codec picks its format from
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".partial-{}", name))
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove partial output"),
    }
}
