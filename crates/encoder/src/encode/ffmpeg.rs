//! ffmpeg codec for the audiobook encoder
//!
//! Builds and runs the ffmpeg command that transcodes one chapter file
//! with the bitrate, channel count and sample rate of a quality preset.

use super::{Codec, CodecError};
use crate::preset::QualityPreset;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Exit code reported when the process was killed by a signal
pub const TERMINATED_CODE: i32 = -1;

/// Exit code reported when ffmpeg could not be started at all
pub const SPAWN_FAILED_CODE: i32 = 127;

/// Transcodes through an ffmpeg executable
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
    /// ffmpeg binary (name on PATH or absolute path)
    pub program: PathBuf,
    /// Audio encoder passed to `-c:a`
    pub audio_codec: String,
}

impl FfmpegCodec {
    pub fn new(program: impl Into<PathBuf>, audio_codec: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            audio_codec: audio_codec.into(),
        }
    }
}

impl Default for FfmpegCodec {
    fn default() -> Self {
        Self::new("ffmpeg", "aac")
    }
}

/// Build an ffmpeg command for one chapter
///
/// Creates a Command configured with:
/// - `-n` so an existing target is never overwritten
/// - Input path, video streams (embedded art) dropped
/// - Audio encoder, bitrate, channel count and sample rate from the preset
/// - Output path
pub fn build_ffmpeg_command(
    codec: &FfmpegCodec,
    source: &Path,
    target: &Path,
    preset: QualityPreset,
) -> Command {
    let mut cmd = Command::new(&codec.program);

    cmd.arg("-hide_banner").arg("-nostdin").arg("-n");
    cmd.arg("-loglevel").arg("error");

    cmd.arg("-i").arg(source);
    cmd.arg("-vn");

    cmd.arg("-c:a").arg(&codec.audio_codec);
    cmd.arg("-b:a").arg(format!("{}k", preset.bitrate_kbps()));
    cmd.arg("-ac").arg(preset.channels().channel_count().to_string());
    cmd.arg("-ar").arg(preset.sample_rate_hz().to_string());

    cmd.arg(target);

    cmd
}

impl Codec for FfmpegCodec {
    fn transcode(&self, source: &Path, target: &Path, preset: QualityPreset) -> Result<(), CodecError> {
        let mut cmd = build_ffmpeg_command(self, source, target, preset);
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());

        let output = match cmd.output() {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(program = %self.program.display(), error = %e, "failed to start ffmpeg");
                return Err(CodecError { code: SPAWN_FAILED_CODE });
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let last_line = stderr.lines().last().unwrap_or("unknown error");
        match output.status.code() {
            Some(code) => {
                tracing::warn!(source = %source.display(), code, "ffmpeg failed: {}", last_line);
                Err(CodecError { code })
            }
            None => {
                tracing::warn!(source = %source.display(), "ffmpeg was terminated by a signal");
                Err(CodecError { code: TERMINATED_CODE })
            }
        }
    }
}
