//! Audiobook Encoder
//!
//! Batch encoding backend for audiobooks: a job queue of audiobooks, a
//! bounded chapter-encoding pool driving an external codec, and per-book
//! export results.

pub mod audiobook;
pub mod concurrency;
pub mod control;
pub mod encode;
pub mod export;
pub mod preset;
pub mod project;
pub mod queue;
pub mod scan;
pub mod scheduler;
pub mod startup;
pub mod status;
pub mod status_server;
pub mod task;
pub mod worker;

pub use audiobook_encoder_config as config;
pub use audiobook_encoder_config::Config;
pub use audiobook::{sanitize_file_name, AudiobookSpec, Metadata, SpecId, ValidationError};
pub use concurrency::{derive_plan, ChapterOrdering, ConcurrencyPlan};
pub use control::{AudiobookView, Command, ControlError, ControlHandle, ControlLoop, ExportTicket};
pub use encode::{build_ffmpeg_command, Codec, CodecError, FfmpegCodec};
pub use export::{
    ChapterFailure, ExportController, ExportError, ExportOutcome, ExportPlan, ExportResult,
    ExportSummary,
};
pub use preset::{ChannelMode, PresetError, PresetStore, QualityPreset};
pub use project::{load_project, save_project, ProjectError};
pub use queue::{JobQueue, QueueError};
pub use scan::{import_audiobook, is_audio_file, natural_cmp, scan_audio_files};
pub use scheduler::{EncodeScheduler, RunHandle, RunReport, SchedulerError};
pub use startup::{check_codec_available, parse_ffmpeg_version, run_startup_checks, StartupError};
pub use status::{new_shared_status, ExportStatus, SharedStatus};
pub use status_server::{create_status_router, run_status_server, ServerError};
pub use task::{EncodeTask, TaskEvent, TaskEventKind, TaskStatus};
pub use worker::{EncodeError, EncodeWorker};
