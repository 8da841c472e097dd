//! # JSON Output Module
//!
//! Output strutturato JSON-lines per consumatori programmatici (`--json`).
//!
//! ## Responsabilità:
//! - Un messaggio JSON per riga su stdout, i log restano su stderr
//! - Riusa i tipi del motore (`AnalysisResult`, `HistoryItem`, `HistoryStats`)
//! - Traduce gli eventi del `ProgressTracker` in messaggi `stage` / `progress`
//!
//! ## Tipi di messaggi:
//! - `analysis`: risultato dell'analisi di un file
//! - `formats`: formati disponibili per un file
//! - `stage` / `progress`: avanzamento del job
//! - `artifact`: file scritto su disco
//! - `complete`: fine del job con il record di storico
//! - `history` / `history_stats`: consultazione dello storico
//! - `tools`: disponibilità dei tool esterni
//! - `error`: errore con dettagli opzionali

use crate::analyzer::AnalysisResult;
use crate::formats::{ConversionFormat, FileKind};
use crate::history::{HistoryItem, HistoryStats};
use crate::optimizer::progress_tracker::{ProcessingStage, ProgressEvent};
use crate::platform::SystemInfo;
use serde::Serialize;
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    Analysis {
        file: String,
        kind: FileKind,
        result: AnalysisResult,
    },
    Formats {
        file: String,
        kind: FileKind,
        formats: Vec<ConversionFormat>,
    },
    Stage {
        stage: ProcessingStage,
    },
    Progress {
        stage: ProcessingStage,
        fraction: f64,
    },
    Artifact {
        path: PathBuf,
        size: u64,
    },
    Complete {
        item: HistoryItem,
        recorded: bool,
    },
    History {
        items: Vec<HistoryItem>,
    },
    HistoryStats {
        #[serde(flatten)]
        stats: HistoryStats,
    },
    Tools {
        system: SystemInfo,
        available: Vec<String>,
        missing: Vec<String>,
    },
    Error {
        message: String,
        details: Option<String>,
    },
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    /// Job events that have a JSON counterpart. `Failed` is reported through
    /// the error message of the command instead.
    pub fn from_event(event: &ProgressEvent) -> Option<Self> {
        match event {
            ProgressEvent::StageChanged { stage } => Some(Self::Stage { stage: *stage }),
            ProgressEvent::ProgressUpdated { stage, fraction } => Some(Self::Progress {
                stage: *stage,
                fraction: *fraction,
            }),
            ProgressEvent::Failed { .. } | ProgressEvent::Completed => None,
        }
    }

    /// Crea un messaggio di errore
    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            details,
        }
    }
}
