//! Audiobook job model.
//!
//! An [`AudiobookSpec`] describes one audiobook to export: its metadata, the
//! ordered chapter files, the quality preset and where the output goes.

use crate::preset::QualityPreset;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Reasons an audiobook is rejected before it enters the queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Audiobook '{0}' has no source files")]
    NoFiles(String),

    #[error("Audiobook '{0}' has no title")]
    MissingTitle(String),

    #[error("Audiobook '{0}' has no export destination")]
    MissingDestination(String),
}

/// Stable identity of an audiobook in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecId(Uuid);

impl SpecId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SpecId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for SpecId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(SpecId)
    }
}

/// Descriptive fields shown in the editor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub genre: String,
}

impl Metadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// One audiobook export job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudiobookSpec {
    pub id: SpecId,
    /// Name shown in the audiobook list
    pub name: String,
    /// Source files in chapter order
    pub files: Vec<PathBuf>,
    pub metadata: Metadata,
    #[serde(default)]
    pub cover_art: Option<PathBuf>,
    #[serde(default)]
    pub preset: QualityPreset,
    pub destination: PathBuf,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl AudiobookSpec {
    /// Create an active audiobook titled after its name, using the default preset.
    pub fn new(name: impl Into<String>, files: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self {
            id: SpecId::new(),
            metadata: Metadata::titled(name.clone()),
            name,
            files,
            cover_art: None,
            preset: QualityPreset::default(),
            destination: destination.into(),
            active: true,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_preset(mut self, preset: QualityPreset) -> Self {
        self.preset = preset;
        self
    }

    pub fn with_cover_art(mut self, cover: impl Into<PathBuf>) -> Self {
        self.cover_art = Some(cover.into());
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Check the invariants every queued audiobook must hold
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.files.is_empty() {
            return Err(ValidationError::NoFiles(self.name.clone()));
        }
        if self.metadata.title.trim().is_empty() {
            return Err(ValidationError::MissingTitle(self.name.clone()));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(ValidationError::MissingDestination(self.name.clone()));
        }
        Ok(())
    }

    /// Directory the chapter files of this audiobook are written to
    pub fn output_dir(&self) -> PathBuf {
        self.destination.join(sanitize_file_name(&self.metadata.title))
    }
}

/// Replace characters that are unsafe in file names on common filesystems.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}
