//! Job queue holding the audiobooks of the current project.
//!
//! The queue is plain single-owner state: every mutation goes through
//! `&mut self`, so it lives on the control task and is never shared.

use crate::audiobook::{AudiobookSpec, Metadata, SpecId, ValidationError};
use crate::preset::QualityPreset;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("No audiobook with id {0}")]
    NotFound(SpecId),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Audiobook {id} has no file at position {index}")]
    FileIndexOutOfRange { id: SpecId, index: usize },

    #[error("An audiobook with id {0} is already queued")]
    DuplicateId(SpecId),
}

/// Ordered collection of audiobooks, in the order they were added
#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    specs: Vec<AudiobookSpec>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an audiobook; invalid audiobooks and reused ids never enter the queue.
    pub fn add(&mut self, spec: AudiobookSpec) -> Result<SpecId, QueueError> {
        spec.validate()?;
        let id = spec.id;
        if self.specs.iter().any(|s| s.id == id) {
            return Err(QueueError::DuplicateId(id));
        }
        tracing::debug!(id = %id, name = %spec.name, files = spec.files.len(), "audiobook added");
        self.specs.push(spec);
        Ok(id)
    }

    pub fn remove(&mut self, id: SpecId) -> Result<AudiobookSpec, QueueError> {
        let pos = self.position(id)?;
        Ok(self.specs.remove(pos))
    }

    pub fn set_active(&mut self, id: SpecId, active: bool) -> Result<(), QueueError> {
        self.get_mut(id)?.active = active;
        Ok(())
    }

    /// Audiobooks whose id is in `ids`, in queue order. Inactive ones are included.
    pub fn selected(&self, ids: &HashSet<SpecId>) -> Vec<&AudiobookSpec> {
        self.specs.iter().filter(|s| ids.contains(&s.id)).collect()
    }

    pub fn get(&self, id: SpecId) -> Result<&AudiobookSpec, QueueError> {
        self.specs
            .iter()
            .find(|s| s.id == id)
            .ok_or(QueueError::NotFound(id))
    }

    /// Replace the metadata; a blank title is rejected and nothing changes.
    pub fn update_metadata(&mut self, id: SpecId, metadata: Metadata) -> Result<(), QueueError> {
        self.edit(id, |spec| spec.metadata = metadata)
    }

    pub fn set_preset(&mut self, id: SpecId, preset: QualityPreset) -> Result<(), QueueError> {
        self.get_mut(id)?.preset = preset;
        Ok(())
    }

    pub fn set_destination(&mut self, id: SpecId, destination: PathBuf) -> Result<(), QueueError> {
        self.edit(id, |spec| spec.destination = destination)
    }

    pub fn set_cover_art(&mut self, id: SpecId, cover: Option<PathBuf>) -> Result<(), QueueError> {
        self.get_mut(id)?.cover_art = cover;
        Ok(())
    }

    /// Drop one chapter; removing the last remaining file is rejected.
    pub fn remove_file(&mut self, id: SpecId, index: usize) -> Result<PathBuf, QueueError> {
        let spec = self.get_mut(id)?;
        if index >= spec.files.len() {
            return Err(QueueError::FileIndexOutOfRange { id, index });
        }
        if spec.files.len() == 1 {
            return Err(ValidationError::NoFiles(spec.name.clone()).into());
        }
        Ok(spec.files.remove(index))
    }

    /// Move a chapter from position `from` to position `to`
    pub fn move_file(&mut self, id: SpecId, from: usize, to: usize) -> Result<(), QueueError> {
        let spec = self.get_mut(id)?;
        let len = spec.files.len();
        for index in [from, to] {
            if index >= len {
                return Err(QueueError::FileIndexOutOfRange { id, index });
            }
        }
        let file = spec.files.remove(from);
        spec.files.insert(to, file);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudiobookSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn ids(&self) -> HashSet<SpecId> {
        self.specs.iter().map(|s| s.id).collect()
    }

    pub fn into_specs(self) -> Vec<AudiobookSpec> {
        self.specs
    }

    fn position(&self, id: SpecId) -> Result<usize, QueueError> {
        self.specs
            .iter()
            .position(|s| s.id == id)
            .ok_or(QueueError::NotFound(id))
    }

    fn get_mut(&mut self, id: SpecId) -> Result<&mut AudiobookSpec, QueueError> {
        self.specs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(QueueError::NotFound(id))
    }

    /// Apply an edit to a copy and keep it only if it still validates
    fn edit(&mut self, id: SpecId, change: impl FnOnce(&mut AudiobookSpec)) -> Result<(), QueueError> {
        let spec = self.get_mut(id)?;
        let mut edited = spec.clone();
        change(&mut edited);
        edited.validate()?;
        *spec = edited;
        Ok(())
    }
}
