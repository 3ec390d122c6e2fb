//! Startup checks
//!
//! Preflight checks run before an export:
//! - the codec executable can be started
//! - it reports a parsable ffmpeg version

use crate::config::Config;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Codec {program} not available: {reason}")]
    CodecUnavailable { program: String, reason: String },

    #[error("Could not parse ffmpeg version from output: {0}")]
    UnparsableVersion(String),
}

/// Parse ffmpeg `-version` output and extract the major version number
///
/// Handles various ffmpeg version formats:
/// - Standard: "ffmpeg version 7.1 ..."
/// - N-prefixed: "ffmpeg version n7.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');
    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

/// Runs `<program> -version` and returns the major version.
pub fn check_codec_available(program: &Path) -> Result<u32, StartupError> {
    let unavailable = |reason: String| StartupError::CodecUnavailable {
        program: program.display().to_string(),
        reason,
    };

    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| unavailable(format!("is it installed and in PATH? {}", e)))?;

    if !output.status.success() {
        return Err(unavailable(format!("-version exited with {}", output.status)));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let major = parse_ffmpeg_version(&version_output).ok_or_else(|| {
        StartupError::UnparsableVersion(version_output.lines().next().unwrap_or("(empty)").to_string())
    })?;

    tracing::info!(program = %program.display(), major, "codec available");
    Ok(major)
}

/// Run all startup checks for the configured codec
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    check_codec_available(Path::new(&cfg.encoder.ffmpeg_path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let version_output = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                major, minor, patch
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }

        #[test]
        fn prop_ffmpeg_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            build in "[a-z0-9]{1,8}",
        ) {
            let version_output = format!(
                "ffmpeg version n{}.{}-{} Copyright (c) 2000-2024 the FFmpeg developers\nbuilt with gcc 13",
                major, minor, build
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }
    }

    #[test]
    fn test_unparsable_versions() {
        assert_eq!(parse_ffmpeg_version(""), None);
        assert_eq!(parse_ffmpeg_version("sox: SoX v14.4.2"), None);
        assert_eq!(parse_ffmpeg_version("ffmpeg version N-113245-gd0a1c2 Copyright"), None);
        assert_eq!(
            parse_ffmpeg_version("libavutil 59.\nffmpeg version 6.1.1-3ubuntu5 Copyright"),
            Some(6)
        );
    }

    #[test]
    fn test_missing_codec_is_unavailable() {
        let err = check_codec_available(Path::new("/nonexistent/bin/ffmpeg-audiobook")).unwrap_err();
        assert!(matches!(err, StartupError::CodecUnavailable { .. }));
    }

    #[test]
    fn test_startup_checks_use_configured_program() {
        let mut cfg = Config::default();
        cfg.encoder.ffmpeg_path = "/nonexistent/bin/ffmpeg-audiobook".to_string();
        let err = run_startup_checks(&cfg).unwrap_err();
        assert!(err.to_string().contains("ffmpeg-audiobook"));
    }
}
