//! # File Optimizer - Main Entry Point
//!
//! Questo è il punto di ingresso della CLI, il livello di presentazione
//! del motore: nessuna logica di conversione vive qui.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del logging con `tracing` (stderr, `RUST_LOG`)
//! - Caricamento della configurazione e override da flag
//! - Rendering dell'avanzamento (indicatif) o JSON-lines (`--json`)
//! - Scrittura degli artifact su disco senza sovrascrivere il sorgente
//! - Ctrl-C annulla il job in corso
//!
//! ## Esempio di utilizzo:
//! ```bash
//! file-optimizer analyze scan.pdf
//! file-optimizer convert scan.pdf --to jpg --preset mail
//! file-optimizer convert a.png b.png c.png --to pdf
//! file-optimizer history stats
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use space_file_optimizer::{
    json_output::JsonMessage,
    progress::{self, JobProgress},
    Config, ConversionFormat, ConversionOptions, FileManager, FileOptimizer, HistoryStore, JobRequest,
    PathResolver, PlatformCommands, Preset, ProgressTracker, VideoQualityTier,
};

/// Files analyzed at the same time by `analyze`
const ANALYSIS_CONCURRENCY: usize = 4;

#[derive(Parser)]
#[command(name = "file-optimizer")]
#[command(about = "Analyze, convert and compress documents, images and videos")]
struct Args {
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// History file (overrides the configuration)
    #[arg(long, global = true)]
    history: Option<PathBuf>,

    /// Emit JSON lines on stdout instead of human-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Estimate how much space can be reclaimed
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List the formats a file can be converted to
    Formats { file: PathBuf },
    /// Convert one file, or merge several images into one PDF
    Convert {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Target format (pdf, jpg, png, heic, webp, tiff, mp4, mov, gif)
        #[arg(long)]
        to: ConversionFormat,

        /// Option preset (mail, whatsapp, quality, custom)
        #[arg(short, long, default_value = "custom")]
        preset: Preset,

        /// Quality for lossy formats (0.10-1.00, custom preset only)
        #[arg(short, long, default_value = "0.8")]
        quality: f64,

        /// Video quality tier (low, medium, high, custom preset only)
        #[arg(long, default_value = "medium")]
        video_quality: VideoQualityTier,

        /// GIF frame rate (5-30, custom preset only)
        #[arg(long, default_value = "15")]
        fps: u32,

        /// Size budget in bytes (custom preset only)
        #[arg(long)]
        max_size: Option<u64>,

        /// Output directory (default: next to the source)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Browse past conversions
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Show which external codecs are installed
    Tools,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Most recent conversions first
    List {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Aggregate savings
    Stats,
    /// Delete one record
    Remove { id: Uuid },
    /// Delete every record
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so JSON on stdout stays parseable
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let json = args.json;
    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) if json => {
            JsonMessage::error(e.to_string(), e.chain().nth(1).map(|s| s.to_string())).emit();
            std::process::exit(1);
        }
        Err(e) => Err(e),
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match args.config {
        Some(ref path) => Config::from_file(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(history) = args.history {
        config.history_path = Some(history);
    }
    config.validate()?;

    let platform = PlatformCommands::new(Duration::from_secs(config.tool_timeout_secs));
    let history_path = config.resolved_history_path()?;
    debug!("History file: {}", history_path.display());
    let history_store = HistoryStore::open(&history_path, config.empty_average_savings_percent).await?;
    let optimizer = FileOptimizer::with_history(config, platform, Arc::new(history_store))?;

    match args.command {
        Command::Analyze { files } => analyze(&optimizer, &files, args.json).await,
        Command::Formats { file } => formats(&optimizer, &file, args.json).await,
        Command::Convert {
            files,
            to,
            preset,
            quality,
            video_quality,
            fps,
            max_size,
            output,
        } => {
            let options = ConversionOptions {
                quality,
                video_quality,
                gif_frame_rate: fps,
                size_budget: max_size,
            };
            convert(&optimizer, &files, to, preset, options, output.as_deref(), args.json).await
        }
        Command::History { action } => history(&optimizer, action, args.json).await,
        Command::Tools => {
            tools(optimizer.platform(), args.json);
            Ok(())
        }
    }
}

async fn analyze(optimizer: &FileOptimizer, files: &[PathBuf], json: bool) -> Result<()> {
    let cancel = tokio_util::sync::CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut sources = Vec::with_capacity(files.len());
    for path in files {
        sources.push(optimizer.inspect(path).await?);
    }

    // Analyses run concurrently, results keep the input order
    let spinner = (!json).then(|| JobProgress::spinner(&format!("🔍 Analyzing {} file(s)", sources.len())));
    let cancel = &cancel;
    let results: Vec<_> = stream::iter(&sources)
        .map(move |source| optimizer.analyze(source, cancel))
        .buffered(ANALYSIS_CONCURRENCY)
        .collect()
        .await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    for (source, result) in sources.into_iter().zip(results) {
        let result = result?;

        if json {
            JsonMessage::Analysis {
                file: source.name,
                kind: source.kind,
                result,
            }
            .emit();
            continue;
        }

        println!("📄 {} ({}, {})", source.name, source.kind, FileManager::format_size(source.size));
        println!("  • Pages: {}", result.page_count);
        println!("  • Images: {}", result.image_count);
        println!("  • Image density: {}", result.image_density);
        println!("  • Estimated savings: {}", result.estimated_savings);
        if let Some(dpi) = result.original_dpi {
            println!("  • Original DPI: {:.0}", dpi);
        }
        if result.is_already_optimized {
            println!("  • Already optimized");
        }
    }
    Ok(())
}

async fn formats(optimizer: &FileOptimizer, file: &Path, json: bool) -> Result<()> {
    let source = optimizer.inspect(file).await?;
    let formats = optimizer.available_formats(&source);

    if json {
        JsonMessage::Formats {
            file: source.name,
            kind: source.kind,
            formats,
        }
        .emit();
    } else if formats.is_empty() {
        println!("{} ({}) cannot be converted", source.name, source.kind);
    } else {
        let names: Vec<&str> = formats.iter().map(|f| f.extension()).collect();
        println!("{} ({}): {}", source.name, source.kind, names.join(", "));
    }
    Ok(())
}

async fn convert(
    optimizer: &FileOptimizer,
    files: &[PathBuf],
    to: ConversionFormat,
    preset: Preset,
    options: ConversionOptions,
    output_dir: Option<&Path>,
    json: bool,
) -> Result<()> {
    let mut sources = Vec::with_capacity(files.len());
    for path in files {
        sources.push(optimizer.inspect(path).await?);
    }
    let label = match sources.as_slice() {
        [single] => single.name.clone(),
        many => format!("{} files", many.len()),
    };
    info!("🚀 Converting {} to {} ({} preset)", label, to, preset);

    let tracker = ProgressTracker::new();
    let renderer = if json {
        let mut events = tracker.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(message) = JsonMessage::from_event(&event) {
                            message.emit();
                        }
                        if event.is_final() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    } else {
        JobProgress::new(label).attach(&tracker)
    };

    let canceller = tracker.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling job");
            canceller.cancel();
        }
    });

    let request = JobRequest {
        sources: sources.clone(),
        target: to,
        preset,
        options,
    };
    let result = optimizer.optimize(request, &tracker).await;
    ctrl_c.abort();
    drop(tracker);
    if let Err(e) = renderer.await {
        debug!("Progress renderer stopped: {}", e);
    }
    let outcome = result?;

    let anchor = &sources[0].path;
    for artifact in &outcome.artifacts {
        let path = PathResolver::get_output_path(anchor, &artifact.file_name, output_dir)?;
        PathResolver::ensure_parent_dirs(&path).await?;
        tokio::fs::write(&path, &artifact.bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        if json {
            JsonMessage::Artifact {
                path,
                size: artifact.size(),
            }
            .emit();
        } else {
            println!("💾 {} ({})", path.display(), FileManager::format_size(artifact.size()));
        }
    }

    let item = outcome.history_item;
    if json {
        JsonMessage::Complete {
            item,
            recorded: outcome.recorded,
        }
        .emit();
    } else {
        println!(
            "✅ {}",
            progress::format_summary(
                item.original_size,
                item.compressed_size,
                item.savings_percent,
                outcome.artifacts.len()
            )
        );
    }
    Ok(())
}

async fn history(optimizer: &FileOptimizer, action: HistoryAction, json: bool) -> Result<()> {
    let store = optimizer.history();
    match action {
        HistoryAction::List { limit } => {
            let items = match limit {
                Some(limit) => store.recent(limit).await,
                None => store.all().await,
            };
            if json {
                JsonMessage::History { items }.emit();
            } else if items.is_empty() {
                println!("No conversions recorded yet");
            } else {
                for item in items {
                    println!(
                        "{}  {}  {}  {} → {}  -{}%  [{}]",
                        item.id,
                        item.processed_at.format("%Y-%m-%d %H:%M"),
                        item.file_name,
                        FileManager::format_size(item.original_size),
                        FileManager::format_size(item.compressed_size),
                        item.savings_percent,
                        item.preset_used
                    );
                }
            }
        }
        HistoryAction::Stats => {
            let stats = store.stats().await;
            if json {
                JsonMessage::HistoryStats { stats }.emit();
            } else {
                println!("📊 History statistics:");
                println!("  • Conversions: {}", stats.count);
                println!("  • Total saved: {}", FileManager::format_size(stats.total_saved_bytes));
                println!("  • Average savings: {}%", stats.average_savings_percent);
                match stats.best_savings_percent {
                    Some(best) => println!("  • Best savings: {}%", best),
                    None => println!("  • Best savings: -"),
                }
            }
        }
        HistoryAction::Remove { id } => {
            if !store.remove(id).await? {
                return Err(anyhow::anyhow!("No history record with id {}", id));
            }
            info!("🗑️ Removed history record {}", id);
        }
        HistoryAction::Clear => {
            let removed = store.clear().await?;
            info!("🗑️ Removed {} history record(s)", removed);
        }
    }
    Ok(())
}

fn tools(platform: &PlatformCommands, json: bool) {
    let system = PlatformCommands::system_info();
    if json {
        let (available, missing) = platform.tool_availability();
        JsonMessage::Tools {
            system,
            available,
            missing,
        }
        .emit();
    } else {
        println!("System: {}", system);
        println!("{}", platform.get_tools_report());
    }
}
