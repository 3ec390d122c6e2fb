//! Folder import for audiobooks.
//!
//! Walks a directory for audio files and orders them as chapters, so a
//! folder picked in the UI becomes an [`AudiobookSpec`].

use crate::audiobook::{AudiobookSpec, ValidationError};
use crate::preset::QualityPreset;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Audio file extensions accepted as chapter sources (case-insensitive matching).
pub const AUDIO_EXTENSIONS: &[&str] = &[
    ".mp3", ".m4a", ".m4b", ".aac", ".flac", ".wav", ".aiff", ".aif", ".ogg", ".opus", ".wma",
];

/// Checks if a file has a supported audio extension (case-insensitive).
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            AUDIO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Compare two strings so that digit runs order by value:
/// `Chapter 2` < `Chapter 10`. Letters compare case-insensitively.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let ln = take_digits(&mut left);
                let rn = take_digits(&mut right);
                let lt = ln.trim_start_matches('0');
                let rt = rn.trim_start_matches('0');
                let ord = lt
                    .len()
                    .cmp(&rt.len())
                    .then_with(|| lt.cmp(rt))
                    .then_with(|| ln.len().cmp(&rn.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

/// Collect the audio files below `dir` in chapter order.
///
/// This function:
/// - Walks `dir` up to `max_depth` levels (1 = only direct children)
/// - Skips hidden files and directories (names starting with `.`)
/// - Keeps files with a supported audio extension
/// - Orders the result by natural order of the path relative to `dir`
pub fn scan_audio_files(dir: &Path, max_depth: usize) -> Vec<PathBuf> {
    let walker = WalkDir::new(dir)
        .max_depth(max_depth.max(1))
        .into_iter()
        .filter_entry(|entry| {
            // Allow the root directory even if it starts with '.'
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with('.'))
                    .unwrap_or(false)
        });

    let mut files: Vec<PathBuf> = walker
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    files.sort_by(|a, b| {
        let ra = a.strip_prefix(dir).unwrap_or(a).to_string_lossy();
        let rb = b.strip_prefix(dir).unwrap_or(b).to_string_lossy();
        natural_cmp(&ra, &rb)
    });
    files
}

/// Build an audiobook from a folder of chapter files.
///
/// The folder name becomes both list name and title. Nested folders (CD1,
/// CD2, ...) are included up to two levels deep.
pub fn import_audiobook(
    dir: &Path,
    destination: &Path,
    preset: QualityPreset,
) -> Result<AudiobookSpec, ValidationError> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.to_string_lossy().into_owned());

    let files = scan_audio_files(dir, 3);
    tracing::debug!(dir = %dir.display(), files = files.len(), "scanned audiobook folder");

    let spec = AudiobookSpec::new(name, files, destination).with_preset(preset);
    spec.validate()?;
    Ok(spec)
}
