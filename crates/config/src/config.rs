//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::Path;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// External codec settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Path or name of the ffmpeg executable
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// ffmpeg audio encoder name passed to `-c:a`
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    /// Extension of the encoded chapter files (without the dot)
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_output_extension() -> String {
    "m4a".to_string()
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            audio_codec: default_audio_codec(),
            output_extension: default_output_extension(),
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Number of parallel encode workers (0 = auto-derive)
    #[serde(default)]
    pub concurrency: u32,
    /// Upper bound for the auto-derived worker count
    #[serde(default = "default_concurrency_cap")]
    pub concurrency_cap: u32,
    /// Encode the chapters of one audiobook strictly one after another
    #[serde(default = "default_sequential_chapters")]
    pub sequential_chapters: bool,
}

fn default_concurrency_cap() -> u32 {
    4
}

fn default_sequential_chapters() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            concurrency_cap: default_concurrency_cap(),
            sequential_chapters: default_sequential_chapters(),
        }
    }
}

/// Export defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    /// Quality preset used for newly imported audiobooks
    #[serde(default = "default_preset")]
    pub default_preset: String,
}

fn default_preset() -> String {
    "96k".to_string()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_preset: default_preset(),
        }
    }
}

/// Status endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    /// Address the status HTTP server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:7879".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// tracing filter directive, used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - AUDIOBOOK_CONCURRENCY -> scheduler.concurrency
    /// - AUDIOBOOK_CONCURRENCY_CAP -> scheduler.concurrency_cap
    /// - AUDIOBOOK_SEQUENTIAL_CHAPTERS -> scheduler.sequential_chapters
    /// - AUDIOBOOK_FFMPEG_PATH -> encoder.ffmpeg_path
    /// - AUDIOBOOK_OUTPUT_EXTENSION -> encoder.output_extension
    /// - AUDIOBOOK_DEFAULT_PRESET -> export.default_preset
    /// - AUDIOBOOK_STATUS_ADDR -> status.bind_addr
    /// - AUDIOBOOK_LOG -> logging.filter
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("AUDIOBOOK_CONCURRENCY") {
            if let Ok(workers) = val.parse::<u32>() {
                self.scheduler.concurrency = workers;
            }
        }

        if let Ok(val) = env::var("AUDIOBOOK_CONCURRENCY_CAP") {
            if let Ok(cap) = val.parse::<u32>() {
                self.scheduler.concurrency_cap = cap;
            }
        }

        if let Ok(val) = env::var("AUDIOBOOK_SEQUENTIAL_CHAPTERS") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.scheduler.sequential_chapters = true,
                "false" | "0" | "no" => self.scheduler.sequential_chapters = false,
                _ => {} // Invalid value, keep existing
            }
        }

        if let Ok(val) = env::var("AUDIOBOOK_FFMPEG_PATH") {
            if !val.is_empty() {
                self.encoder.ffmpeg_path = val;
            }
        }

        if let Ok(val) = env::var("AUDIOBOOK_OUTPUT_EXTENSION") {
            let ext = val.trim_start_matches('.');
            if !ext.is_empty() {
                self.encoder.output_extension = ext.to_string();
            }
        }

        if let Ok(val) = env::var("AUDIOBOOK_DEFAULT_PRESET") {
            if !val.is_empty() {
                self.export.default_preset = val;
            }
        }

        if let Ok(val) = env::var("AUDIOBOOK_STATUS_ADDR") {
            if !val.is_empty() {
                self.status.bind_addr = val;
            }
        }

        if let Ok(val) = env::var("AUDIOBOOK_LOG") {
            if !val.is_empty() {
                self.logging.filter = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("AUDIOBOOK_CONCURRENCY");
        env::remove_var("AUDIOBOOK_CONCURRENCY_CAP");
        env::remove_var("AUDIOBOOK_SEQUENTIAL_CHAPTERS");
        env::remove_var("AUDIOBOOK_FFMPEG_PATH");
        env::remove_var("AUDIOBOOK_OUTPUT_EXTENSION");
        env::remove_var("AUDIOBOOK_DEFAULT_PRESET");
        env::remove_var("AUDIOBOOK_STATUS_ADDR");
        env::remove_var("AUDIOBOOK_LOG");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            concurrency in 0u32..64,
            cap in 1u32..16,
            sequential in proptest::bool::ANY,
            codec in "[a-z0-9_]{1,12}",
            ext in "[a-z0-9]{1,5}",
            preset in prop::sample::select(vec!["96k", "128k", "256k", "320k"]),
            port in 1024u16..65535,
        ) {
            let toml_str = format!(
                r#"
[encoder]
audio_codec = "{}"
output_extension = "{}"

[scheduler]
concurrency = {}
concurrency_cap = {}
sequential_chapters = {}

[export]
default_preset = "{}"

[status]
bind_addr = "127.0.0.1:{}"
"#,
                codec, ext, concurrency, cap, sequential, preset, port
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(&config.encoder.audio_codec, &codec);
            prop_assert_eq!(&config.encoder.output_extension, &ext);
            prop_assert_eq!(config.scheduler.concurrency, concurrency);
            prop_assert_eq!(config.scheduler.concurrency_cap, cap);
            prop_assert_eq!(config.scheduler.sequential_chapters, sequential);
            prop_assert_eq!(config.export.default_preset.as_str(), preset);
            prop_assert_eq!(config.status.bind_addr, format!("127.0.0.1:{}", port));
            // Untouched sections keep their defaults
            prop_assert_eq!(config.encoder.ffmpeg_path.as_str(), "ffmpeg");
            prop_assert_eq!(config.logging.filter.as_str(), "info");
        }

        #[test]
        fn prop_env_overrides_concurrency(
            initial in 0u32..32,
            override_workers in 0u32..64,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[scheduler]\nconcurrency = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("AUDIOBOOK_CONCURRENCY", override_workers.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.scheduler.concurrency, override_workers);
        }

        #[test]
        fn prop_env_overrides_sequential_chapters(
            initial in proptest::bool::ANY,
            override_value in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[scheduler]\nsequential_chapters = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("AUDIOBOOK_SEQUENTIAL_CHAPTERS", override_value.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.scheduler.sequential_chapters, override_value);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.encoder.ffmpeg_path, "ffmpeg");
        assert_eq!(config.encoder.audio_codec, "aac");
        assert_eq!(config.encoder.output_extension, "m4a");
        assert_eq!(config.scheduler.concurrency, 0);
        assert_eq!(config.scheduler.concurrency_cap, 4);
        assert!(config.scheduler.sequential_chapters);
        assert_eq!(config.export.default_preset, "96k");
        assert_eq!(config.status.bind_addr, "127.0.0.1:7879");
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[scheduler]
concurrency = 2
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.scheduler.concurrency, 2);
        assert_eq!(config.scheduler.concurrency_cap, 4);
        assert!(config.scheduler.sequential_chapters);
        assert_eq!(config.encoder, EncoderConfig::default());
    }

    #[test]
    fn test_string_overrides_and_invalid_values() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("AUDIOBOOK_FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg");
        env::set_var("AUDIOBOOK_OUTPUT_EXTENSION", ".m4b");
        env::set_var("AUDIOBOOK_SEQUENTIAL_CHAPTERS", "maybe");
        env::set_var("AUDIOBOOK_CONCURRENCY", "lots");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.encoder.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.encoder.output_extension, "m4b");
        // Unparsable values keep the existing setting
        assert!(config.scheduler.sequential_chapters);
        assert_eq!(config.scheduler.concurrency, 0);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/nonexistent/audiobook-encoder/config.toml")
            .expect("missing file should fall back to defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = Config::parse_toml("[scheduler\nconcurrency = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
