//! # Configuration Management Module
//!
//! Questo modulo gestisce la configurazione del motore di ottimizzazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con i parametri del motore
//! - Soglie euristiche dell'analisi (`AnalysisThresholds`), tutte regolabili
//! - Politica multi-pagina per documenti → immagini a pagina singola
//! - Caricamento/salvataggio da/verso file JSON con validazione
//!
//! ## Parametri di configurazione:
//! - `analysis`: soglie di densità (documenti, immagini, video) e DPI obiettivo
//! - `multi_page_policy`: `split_pages` (default) o `reject`
//! - `tool_timeout_secs`: timeout per tool esterni (default: 600)
//! - `gif_max_seconds` / `gif_max_width`: budget per GIF animate
//! - `staging_chunk_size`: dimensione blocchi per upload/download (default: 256 KB)
//! - `empty_average_savings_percent`: media mostrata con storico vuoto (default: 68)
//! - `history_path`: file JSON dello storico (default: `~/.file-optimizer/history.json`)
//! - `work_dir`: directory che ospita i workspace temporanei dei job (default: temp di sistema)
//!
//! ## Soglie euristiche:
//! Le soglie non hanno dati di calibrazione: sono costanti regolabili,
//! non valori "corretti".
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     multi_page_policy: MultiPagePolicy::Reject,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunable thresholds for the compressibility heuristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisThresholds {
    /// Image-byte fraction of a document below which density is low
    pub document_low: f64,
    /// Image-byte fraction of a document below which density is medium
    pub document_high: f64,
    /// Bytes per raw RGB byte for standalone images
    pub image_low: f64,
    pub image_high: f64,
    /// Bits per pixel per frame for videos
    pub video_low: f64,
    pub video_high: f64,
    /// DPI at or below which downsampling is not expected to help
    pub target_dpi: u32,
}

impl Default for AnalysisThresholds {
    fn default() -> Self {
        Self {
            document_low: 0.25,
            document_high: 0.60,
            image_low: 0.08,
            image_high: 0.25,
            video_low: 0.05,
            video_high: 0.15,
            target_dpi: 150,
        }
    }
}

/// What to do when a multi-page document targets a single-page format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiPagePolicy {
    /// One artifact per page
    SplitPages,
    /// Fail with `MultiPageUnsupported`
    Reject,
}

/// Configuration for the optimization engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub analysis: AnalysisThresholds,
    pub multi_page_policy: MultiPagePolicy,
    /// Timeout for a single external tool invocation
    pub tool_timeout_secs: u64,
    /// Longest clip rendered into an animated GIF
    pub gif_max_seconds: u32,
    pub gif_max_width: u32,
    /// Chunk size used while staging input and collecting output
    pub staging_chunk_size: usize,
    /// Average savings reported while the history is empty
    pub empty_average_savings_percent: u8,
    /// History file (None = default location in the home directory)
    pub history_path: Option<PathBuf>,
    /// Parent of the per-job workspaces (None = system temp directory)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analysis: AnalysisThresholds::default(),
            multi_page_policy: MultiPagePolicy::SplitPages,
            tool_timeout_secs: 600,
            gif_max_seconds: 10,
            gif_max_width: 480,
            staging_chunk_size: 256 * 1024,
            empty_average_savings_percent: 68,
            history_path: None,
            work_dir: None,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        let a = &self.analysis;
        if !(0.0..=1.0).contains(&a.document_low) || !(0.0..=1.0).contains(&a.document_high) {
            return Err(anyhow::anyhow!("Document density thresholds must be between 0.0 and 1.0"));
        }
        if a.document_low >= a.document_high {
            return Err(anyhow::anyhow!("document_low must be lower than document_high"));
        }
        if a.image_low <= 0.0 || a.image_low >= a.image_high {
            return Err(anyhow::anyhow!("Image density thresholds must satisfy 0 < low < high"));
        }
        if a.video_low <= 0.0 || a.video_low >= a.video_high {
            return Err(anyhow::anyhow!("Video density thresholds must satisfy 0 < low < high"));
        }
        if a.target_dpi == 0 {
            return Err(anyhow::anyhow!("Target DPI must be greater than 0"));
        }

        if self.tool_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Tool timeout must be greater than 0"));
        }

        if self.gif_max_seconds == 0 || self.gif_max_width < 16 {
            return Err(anyhow::anyhow!("GIF budget must allow at least one frame of 16px"));
        }

        if self.staging_chunk_size < 4096 {
            return Err(anyhow::anyhow!("Staging chunk size must be at least 4096 bytes"));
        }

        if self.empty_average_savings_percent > 100 {
            return Err(anyhow::anyhow!("Empty average savings must be between 0 and 100"));
        }

        Ok(())
    }

    /// History file location, defaulting to `~/.file-optimizer/history.json`
    pub fn resolved_history_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.history_path {
            return Ok(path.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".file-optimizer").join("history.json"))
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
