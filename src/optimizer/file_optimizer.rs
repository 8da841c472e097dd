//! # File Optimizer Service
//!
//! Facciata che collega Format Model, Analysis, Conversion e History per un
//! singolo job. I servizi sono costruiti esplicitamente e iniettati: nessun
//! singleton, nessuno stato globale.
//!
//! ## Flusso di un job:
//! 1. `inspect()`: classificazione del file sorgente
//! 2. `analyze()`: stima dei risparmi (opzionale)
//! 3. `available_formats()`: formati legali per il tipo rilevato
//! 4. `optimize()`: preset → opzioni, conversione o merge, poi append
//!    nello storico solo dopo `done`
//!
//! ## Esempio:
//! ```rust,ignore
//! let optimizer = FileOptimizer::new(Config::default()).await?;
//! let source = optimizer.inspect(Path::new("scan.pdf")).await?;
//! let tracker = ProgressTracker::new();
//! let outcome = optimizer
//!     .optimize(JobRequest::single(source, ConversionFormat::Pdf, Preset::Mail), &tracker)
//!     .await?;
//! ```

use crate::analyzer::{AnalysisEngine, AnalysisResult};
use crate::config::Config;
use crate::converter::{Artifact, ConversionEngine};
use crate::error::{OptimizeError, Result};
use crate::file_manager::{FileManager, FileReference};
use crate::formats::{self, ConversionFormat};
use crate::history::{HistoryItem, HistoryStore};
use crate::optimizer::progress_tracker::ProgressTracker;
use crate::options::{ConversionOptions, Preset};
use crate::platform::PlatformCommands;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What to convert and how
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub sources: Vec<FileReference>,
    pub target: ConversionFormat,
    pub preset: Preset,
    /// Used as-is with `Preset::Custom`, ignored otherwise
    pub options: ConversionOptions,
}

impl JobRequest {
    pub fn single(source: FileReference, target: ConversionFormat, preset: Preset) -> Self {
        Self {
            sources: vec![source],
            target,
            preset,
            options: ConversionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result of a successful job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub artifacts: Vec<Artifact>,
    pub history_item: HistoryItem,
    /// False when the history record could not be saved
    pub recorded: bool,
}

/// Dependency-injected entry point of the engine
pub struct FileOptimizer {
    config: Config,
    platform: PlatformCommands,
    analysis: AnalysisEngine,
    conversion: ConversionEngine,
    history: Arc<HistoryStore>,
}

impl FileOptimizer {
    /// Build with the default tool lookup and the history file named by
    /// `config`
    pub async fn new(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| OptimizeError::Validation(e.to_string()))?;
        let history_path = config
            .resolved_history_path()
            .map_err(|e| OptimizeError::History(e.to_string()))?;
        let history = HistoryStore::open(&history_path, config.empty_average_savings_percent).await?;
        let platform = PlatformCommands::new(Duration::from_secs(config.tool_timeout_secs));
        Self::with_history(config, platform, Arc::new(history))
    }

    pub fn with_history(config: Config, platform: PlatformCommands, history: Arc<HistoryStore>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| OptimizeError::Validation(e.to_string()))?;
        Ok(Self {
            analysis: AnalysisEngine::new(&config, platform.clone()),
            conversion: ConversionEngine::new(&config, platform.clone()),
            config,
            platform,
            history,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> &PlatformCommands {
        &self.platform
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub async fn inspect(&self, path: &Path) -> Result<FileReference> {
        FileReference::open(path).await
    }

    pub fn available_formats(&self, source: &FileReference) -> Vec<ConversionFormat> {
        formats::available_formats(source.kind)
    }

    pub async fn analyze(&self, source: &FileReference, cancel: &CancellationToken) -> Result<AnalysisResult> {
        self.analysis.analyze(source, cancel).await
    }

    /// Run one job. A history record is appended once the job is done; a
    /// failure to save it is logged and does not fail the job.
    pub async fn optimize(&self, request: JobRequest, tracker: &ProgressTracker) -> Result<JobOutcome> {
        let options = request.preset.resolve(request.options.clone());
        let sources = &request.sources;

        let (artifacts, history_name) = match sources.as_slice() {
            [] => return Err(reject(tracker, "no source files given")),
            [source] => {
                let artifacts = self
                    .conversion
                    .convert(source, request.target, &options, tracker)
                    .await?;
                (artifacts, source.name.clone())
            }
            _ if request.target != ConversionFormat::Pdf => {
                return Err(reject(
                    tracker,
                    format!("several files can only be merged into pdf, not {}", request.target),
                ));
            }
            _ => {
                let artifact = self
                    .conversion
                    .merge_to_document(sources, &options, tracker)
                    .await?;
                let name = artifact.file_name.clone();
                (vec![artifact], name)
            }
        };

        let original_size: u64 = sources.iter().map(|s| s.size).sum();
        let compressed_size: u64 = artifacts.iter().map(Artifact::size).sum();
        let history_item = HistoryItem::new(history_name, original_size, compressed_size, request.preset);

        info!(
            "💾 {} → {} ({}% saved)",
            FileManager::format_size(original_size),
            FileManager::format_size(compressed_size),
            history_item.savings_percent
        );

        let recorded = match self.history.append(history_item.clone()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not record job in history: {}", e);
                false
            }
        };

        Ok(JobOutcome {
            artifacts,
            history_item,
            recorded,
        })
    }
}

/// Fail a job that never reached the engine
fn reject(tracker: &ProgressTracker, reason: impl Into<String>) -> OptimizeError {
    let err = OptimizeError::Validation(reason.into());
    if tracker.claim().is_ok() {
        tracker.finish_with_error(&err);
    }
    err
}
