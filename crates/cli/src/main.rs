//! CLI entry point for the audiobook encoder
//!
//! Edits a project file of audiobooks and runs exports.

use audiobook_encoder::{
    derive_plan, import_audiobook, load_project, new_shared_status, run_startup_checks,
    run_status_server, save_project, AudiobookView, Config, ControlLoop, ExportController,
    ExportOutcome, ExportSummary, JobQueue, PresetStore, QualityPreset, SpecId, TaskEvent,
    TaskEventKind,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::collections::HashSet;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

type CliResult = Result<ExitCode, Box<dyn Error>>;

/// Audiobook Encoder - batch-encode audiobook chapters with ffmpeg
#[derive(Parser, Debug)]
#[command(name = "audiobook-encoder")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; defaults apply when it is missing
    #[arg(short, long, global = true, default_value = "audiobook-encoder.toml")]
    config: PathBuf,

    /// Project file holding the audiobook queue
    #[arg(short, long, global = true, default_value = "audiobooks.json")]
    project: PathBuf,

    /// File holding saved presets
    #[arg(long, global = true, default_value = "presets.json")]
    presets: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add an audiobook from a folder of chapter files
    Import(ImportArgs),
    /// List the audiobooks in the project
    List,
    /// Remove an audiobook from the project
    Remove { id: SpecId },
    /// Include an audiobook in exports
    Activate { id: SpecId },
    /// Skip an audiobook in exports
    Deactivate { id: SpecId },
    /// List fixed and saved presets
    Presets,
    /// Save a quality preset under a name
    SavePreset { name: String, preset: String },
    /// Encode the selected audiobooks
    Export(ExportArgs),
}

#[derive(ClapArgs, Debug)]
struct ImportArgs {
    /// Folder containing the chapter files
    dir: PathBuf,

    /// Export destination directory
    #[arg(short, long)]
    destination: PathBuf,

    /// Title; defaults to the folder name
    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    author: Option<String>,

    #[arg(long)]
    comment: Option<String>,

    #[arg(long)]
    genre: Option<String>,

    /// Preset short name (96k, 128k, 256k, 320k), label or saved name
    #[arg(long)]
    preset: Option<String>,

    /// Cover art image
    #[arg(long)]
    cover: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct ExportArgs {
    /// Audiobook ids to export; all audiobooks when omitted
    #[arg(short, long, num_args = 1..)]
    select: Vec<SpecId>,

    /// Preset for this export only, replacing each audiobook's own
    #[arg(long)]
    preset: Option<String>,

    /// Number of chapters encoded in parallel
    #[arg(long)]
    concurrency: Option<u32>,

    /// Encode chapters of one audiobook in parallel
    #[arg(long, default_value = "false")]
    interleaved: bool,

    /// Serve export progress on the configured status address
    #[arg(long, default_value = "false")]
    serve_status: bool,

    /// Skip the codec availability check. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging.filter);

    match run(args, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG wins over the configured filter
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(args: Args, config: Config) -> CliResult {
    let presets = PresetStore::load(&args.presets)?;

    match args.command {
        Commands::Import(import) => import_command(&args.project, &config, &presets, import),
        Commands::List => {
            let queue = load_project(&args.project)?;
            if queue.is_empty() {
                println!("No audiobooks in {}", args.project.display());
            }
            for spec in queue.iter() {
                print_view(&AudiobookView::from(spec));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Remove { id } => edit_project(&args.project, |queue| {
            let spec = queue.remove(id)?;
            println!("Removed {} ({})", spec.name, id);
            Ok(())
        }),
        Commands::Activate { id } => edit_project(&args.project, |queue| Ok(queue.set_active(id, true)?)),
        Commands::Deactivate { id } => edit_project(&args.project, |queue| Ok(queue.set_active(id, false)?)),
        Commands::Presets => {
            for preset in QualityPreset::ALL {
                println!("{:<6} {}", preset.short_name(), preset);
            }
            for (name, preset) in presets.iter() {
                println!("{:<6} {} (saved as \"{}\")", preset.short_name(), preset, name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::SavePreset { name, preset } => {
            let preset: QualityPreset = preset.parse()?;
            let mut presets = presets;
            if let Some(previous) = presets.save(name.trim(), preset) {
                tracing::info!(name = %name, previous = %previous, "replacing saved preset");
            }
            presets.write(&args.presets)?;
            println!("Saved \"{}\" as {}", name.trim(), preset);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Export(export) => export_command(&args.project, config, &presets, export).await,
    }
}

fn import_command(project: &Path, config: &Config, presets: &PresetStore, args: ImportArgs) -> CliResult {
    let preset = match &args.preset {
        Some(name) => presets.resolve(name)?,
        None => presets.resolve(&config.export.default_preset)?,
    };

    let mut spec = import_audiobook(&args.dir, &args.destination, preset)?;
    if let Some(title) = args.title {
        spec.metadata.title = title;
    }
    spec.metadata.author = args.author.unwrap_or_default();
    spec.metadata.comment = args.comment.unwrap_or_default();
    spec.metadata.genre = args.genre.unwrap_or_default();
    spec.cover_art = args.cover;

    let mut queue = load_project(project)?;
    let files = spec.files.len();
    let id = queue.add(spec)?;
    save_project(&queue, project)?;

    tracing::info!(id = %id, files, "audiobook imported");
    println!("{}", id);
    Ok(ExitCode::SUCCESS)
}

fn edit_project(
    project: &Path,
    edit: impl FnOnce(&mut JobQueue) -> Result<(), Box<dyn Error>>,
) -> CliResult {
    let mut queue = load_project(project)?;
    edit(&mut queue)?;
    save_project(&queue, project)?;
    Ok(ExitCode::SUCCESS)
}

async fn export_command(
    project: &Path,
    mut config: Config,
    presets: &PresetStore,
    args: ExportArgs,
) -> CliResult {
    if let Some(concurrency) = args.concurrency {
        config.scheduler.concurrency = concurrency;
    }
    if args.interleaved {
        config.scheduler.sequential_chapters = false;
    }

    if args.skip_checks {
        tracing::warn!("skipping startup checks (--skip-checks enabled)");
    } else {
        run_startup_checks(&config)?;
    }

    let preset_override = args.preset.as_deref().map(|p| presets.resolve(p)).transpose()?;
    let queue = load_project(project)?;
    let selection: HashSet<SpecId> = if args.select.is_empty() {
        queue.ids()
    } else {
        args.select.into_iter().collect()
    };

    let plan = derive_plan(&config);
    tracing::info!(
        workers = plan.workers,
        cores = plan.total_cores,
        ordering = ?plan.ordering,
        "concurrency plan"
    );

    let status = new_shared_status();
    if args.serve_status {
        let status = status.clone();
        let addr = config.status.bind_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = run_status_server(status, &addr).await {
                tracing::error!(error = %e, "status server stopped");
            }
        });
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing running chapters");
                shutdown.cancel();
            }
        });
    }

    let controller = Arc::new(ExportController::from_config(&config, plan, status));
    let (control, handle) = ControlLoop::new(queue, controller, shutdown);
    let control_task = tokio::spawn(control.run());

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let progress_task = tokio::spawn(report_progress(progress_rx));

    let result = handle.export(selection, preset_override, Some(progress_tx)).await;
    drop(handle);
    let _ = progress_task.await;
    let _ = control_task.await;

    let summary = result?;
    print_summary(&summary);
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn report_progress(mut events: mpsc::UnboundedReceiver<TaskEvent>) {
    while let Some(event) = events.recv().await {
        let chapter = event.index + 1;
        match event.kind {
            TaskEventKind::Started { attempt } if attempt > 1 => {
                tracing::info!(audiobook = %event.spec_id, chapter, attempt, "retrying chapter")
            }
            TaskEventKind::Done => tracing::info!(audiobook = %event.spec_id, chapter, "chapter encoded"),
            TaskEventKind::Failed { error } => {
                tracing::warn!(audiobook = %event.spec_id, chapter, error = %error, "chapter failed")
            }
            _ => {}
        }
    }
}

fn print_view(view: &AudiobookView) {
    println!(
        "{}  [{}] {} - {} ({} files, {}) -> {}",
        view.id,
        if view.active { "x" } else { " " },
        view.name,
        view.title,
        view.files,
        view.preset.short_name(),
        view.destination.display()
    );
}

fn print_summary(summary: &ExportSummary) {
    for result in &summary.results {
        let outcome = match result.outcome {
            ExportOutcome::Succeeded => "ok",
            ExportOutcome::PartiallyFailed => "FAILED",
            ExportOutcome::Incomplete => "incomplete",
        };
        println!("{:<10} {} ({}/{} chapters)", outcome, result.name, result.succeeded, result.total);
        for failure in &result.failures {
            println!(
                "           chapter {} {}: {}",
                failure.index + 1,
                failure.source.display(),
                failure.error
            );
        }
    }
    println!(
        "{} audiobooks: {} succeeded, {} failed, {} incomplete{}",
        summary.total,
        summary.succeeded,
        summary.failed,
        summary.incomplete,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_args_parse() {
        let id = SpecId::new();
        let args = Args::try_parse_from([
            "audiobook-encoder",
            "--project",
            "books.json",
            "export",
            "--select",
            &id.to_string(),
            "--preset",
            "320k",
            "--concurrency",
            "2",
            "--interleaved",
        ])
        .unwrap();

        assert_eq!(args.project, PathBuf::from("books.json"));
        match args.command {
            Commands::Export(export) => {
                assert_eq!(export.select, vec![id]);
                assert_eq!(export.preset.as_deref(), Some("320k"));
                assert_eq!(export.concurrency, Some(2));
                assert!(export.interleaved);
                assert!(!export.serve_status);
                assert!(!export.skip_checks);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_import_requires_destination() {
        assert!(Args::try_parse_from(["audiobook-encoder", "import", "/books/Perry Rhodan"]).is_err());
        let args = Args::try_parse_from([
            "audiobook-encoder",
            "import",
            "/books/Perry Rhodan",
            "--destination",
            "/exports",
            "--author",
            "K. H. Scheer",
        ])
        .unwrap();
        assert!(matches!(args.command, Commands::Import(ImportArgs { ref author, .. }) if author.as_deref() == Some("K. H. Scheer")));
    }

    #[test]
    fn test_invalid_id_rejected() {
        assert!(Args::try_parse_from(["audiobook-encoder", "remove", "not-a-uuid"]).is_err());
    }
}
