//! Codec seam for the encoder.
//!
//! The actual transcoding is done by an external collaborator behind the
//! [`Codec`] trait; [`ffmpeg::FfmpegCodec`] is the production implementation.

pub mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_command, FfmpegCodec};

use crate::preset::QualityPreset;
use std::path::Path;
use thiserror::Error;

/// Exit status reported by a failed codec invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("codec exited with code {code}")]
pub struct CodecError {
    pub code: i32,
}

/// A blocking transcoder: one source file in, one encoded file out.
///
/// Implementations must not overwrite an existing `target`.
pub trait Codec: Send + Sync + 'static {
    fn transcode(&self, source: &Path, target: &Path, preset: QualityPreset) -> Result<(), CodecError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted codec used by the worker, scheduler and export tests.

    use super::{Codec, CodecError};
    use crate::preset::QualityPreset;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    pub struct ScriptedCodec {
        /// Source file name -> (remaining failures, exit code)
        failures: Mutex<HashMap<String, (u32, i32)>>,
        delay: Duration,
        calls: Mutex<Vec<(PathBuf, QualityPreset)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedCodec {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Fail the next `times` calls for a source with this file name
        pub fn fail(self, file_name: &str, times: u32, code: i32) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert(file_name.to_string(), (times, code));
            self
        }

        pub fn calls(&self) -> Vec<(PathBuf, QualityPreset)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_for(&self, file_name: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p.file_name().and_then(|n| n.to_str()) == Some(file_name))
                .count()
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    impl Codec for ScriptedCodec {
        fn transcode(&self, source: &Path, target: &Path, preset: QualityPreset) -> Result<(), CodecError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls
                .lock()
                .unwrap()
                .push((source.to_path_buf(), preset));

            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }

            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let failure = {
                let mut failures = self.failures.lock().unwrap();
                match failures.get_mut(&name) {
                    Some((remaining, code)) if *remaining > 0 => {
                        *remaining -= 1;
                        Some(*code)
                    }
                    _ => None,
                }
            };

            let result = match failure {
                Some(code) => {
                    // Leave a truncated file behind like a crashed encoder would
                    let _ = std::fs::write(target, b"partial");
                    Err(CodecError { code })
                }
                None => std::fs::write(target, b"encoded").map_err(|_| CodecError { code: 1 }),
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }
}
