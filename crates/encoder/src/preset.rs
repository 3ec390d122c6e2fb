//! Quality presets and the named preset store.
//!
//! The preset set is fixed; a [`PresetStore`] only maps user-chosen names
//! (usually a series, e.g. "Perry Rhodan") onto one of those presets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors from preset parsing and the preset store
#[derive(Debug, Error)]
pub enum PresetError {
    #[error("Unknown quality preset: {0}")]
    Unknown(String),

    #[error("Preset store IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Preset store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Channel layout of the encoded output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    Mono,
    Stereo,
}

impl ChannelMode {
    pub fn channel_count(self) -> u8 {
        match self {
            ChannelMode::Mono => 1,
            ChannelMode::Stereo => 2,
        }
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMode::Mono => write!(f, "Mono"),
            ChannelMode::Stereo => write!(f, "Stereo"),
        }
    }
}

/// One of the fixed bitrate / channel / sample-rate combinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QualityPreset {
    #[default]
    #[serde(rename = "96k")]
    Kbps96,
    #[serde(rename = "128k")]
    Kbps128,
    #[serde(rename = "256k")]
    Kbps256,
    #[serde(rename = "320k")]
    Kbps320,
}

impl QualityPreset {
    /// Every preset, lowest bitrate first
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::Kbps96,
        QualityPreset::Kbps128,
        QualityPreset::Kbps256,
        QualityPreset::Kbps320,
    ];

    pub fn bitrate_kbps(self) -> u32 {
        match self {
            QualityPreset::Kbps96 => 96,
            QualityPreset::Kbps128 => 128,
            QualityPreset::Kbps256 => 256,
            QualityPreset::Kbps320 => 320,
        }
    }

    pub fn channels(self) -> ChannelMode {
        ChannelMode::Stereo
    }

    pub fn sample_rate_hz(self) -> u32 {
        48_000
    }

    /// Short name used in config files and on the command line
    pub fn short_name(self) -> &'static str {
        match self {
            QualityPreset::Kbps96 => "96k",
            QualityPreset::Kbps128 => "128k",
            QualityPreset::Kbps256 => "256k",
            QualityPreset::Kbps320 => "320k",
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Kbps, {}, {} kHz",
            self.bitrate_kbps(),
            self.channels(),
            self.sample_rate_hz() / 1000
        )
    }
}

impl FromStr for QualityPreset {
    type Err = PresetError;

    /// Accepts the short name (`128k`) or the display label
    /// (`128 Kbps, Stereo, 48 kHz`), case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        QualityPreset::ALL
            .into_iter()
            .find(|p| p.short_name() == wanted || p.to_string().to_lowercase() == wanted)
            .ok_or_else(|| PresetError::Unknown(s.to_string()))
    }
}

/// Named presets saved by the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetStore {
    presets: BTreeMap<String, QualityPreset>,
}

impl PresetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save (or replace) a named preset
    pub fn save(&mut self, name: impl Into<String>, preset: QualityPreset) -> Option<QualityPreset> {
        self.presets.insert(name.into(), preset)
    }

    pub fn get(&self, name: &str) -> Option<QualityPreset> {
        self.presets.get(name).copied()
    }

    pub fn remove(&mut self, name: &str) -> Option<QualityPreset> {
        self.presets.remove(name)
    }

    /// Saved names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, QualityPreset)> {
        self.presets.iter().map(|(name, preset)| (name.as_str(), *preset))
    }

    /// A fixed preset name or label first, then a saved name
    pub fn resolve(&self, name: &str) -> Result<QualityPreset, PresetError> {
        name.parse::<QualityPreset>()
            .or_else(|e| self.get(name.trim()).ok_or(e))
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Load a store from a JSON file; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, PresetError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), PresetError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
