//! # Space File Optimizer Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare del motore di ottimizzazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `formats`: Tipi di file, formati di destinazione e regole di legalità
//! - `options`: Opzioni di conversione validate e preset
//! - `config`: Configurazione del motore (soglie, timeout, storico)
//! - `error`: Tipi di errore del motore
//! - `file_manager`: Riferimenti ai file sorgente e I/O a blocchi
//! - `document`: Modello PDF (lopdf) e pacchetti Office (zip)
//! - `image_processor`: Codec immagine (JPEG/PNG/TIFF in-process, WebP/HEIC esterni)
//! - `video_processor`: Conversione video con ffmpeg
//! - `analyzer`: Stima dei risparmi senza conversione
//! - `converter`: Pipeline di conversione con stadi osservabili
//! - `history`: Storico persistente e statistiche aggregate
//! - `optimizer`: Facciata del job, tracker di avanzamento, path di output
//! - `platform`, `tool_resolver`, `process`: Tool esterni
//! - `progress`, `json_output`: Presentazione per la CLI
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use space_file_optimizer::{Config, ConversionFormat, FileOptimizer, JobRequest, Preset, ProgressTracker};
//!
//! let optimizer = FileOptimizer::new(Config::default()).await?;
//! let source = optimizer.inspect(&path).await?;
//! let tracker = ProgressTracker::new();
//! let outcome = optimizer
//!     .optimize(JobRequest::single(source, ConversionFormat::Jpg, Preset::Whatsapp), &tracker)
//!     .await?;
//! ```

pub mod process;

pub mod analyzer;
pub mod config;
pub mod converter;
pub mod document;
pub mod error;
pub mod file_manager;
pub mod formats;
pub mod history;
pub mod image_processor;
pub mod json_output;
pub mod optimizer;
pub mod options;
pub mod platform;
pub mod progress;
pub mod tool_resolver;
pub mod video_processor;

pub use analyzer::{AnalysisEngine, AnalysisResult, ImageDensity, SavingsEstimate};
pub use config::{AnalysisThresholds, Config, MultiPagePolicy};
pub use converter::{Artifact, ConversionEngine};
pub use error::{OptimizeError, Result};
pub use file_manager::{FileManager, FileReference};
pub use formats::{available_formats, is_multi_file_merge_eligible, ConversionFormat, FileKind};
pub use history::{HistoryItem, HistoryStats, HistoryStore};
pub use optimizer::{
    FileOptimizer, JobOutcome, JobRequest, PathResolver, ProcessingStage, ProgressEvent, ProgressSnapshot,
    ProgressTracker,
};
pub use options::{ConversionOptions, Preset, VideoQualityTier};
pub use platform::PlatformCommands;
