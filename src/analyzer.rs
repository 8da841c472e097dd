//! # Analysis Engine
//!
//! Stima quanto spazio si può recuperare da un file senza eseguire la
//! conversione.
//!
//! ## Responsabilità:
//! - Documenti PDF: immagini embedded uniche e quota di byte occupata
//! - Pacchetti Office (OOXML/ODF): media nello zip rispetto al totale
//! - Immagini: byte per byte RGB grezzo (w × h × 3)
//! - Video: bit per pixel per frame da ffprobe
//! - Classificazione in bucket low/medium/high con soglie configurabili
//! - `is_already_optimized` e stima dei risparmi (funzione pura)
//!
//! L'analisi non modifica nulla: due chiamate sullo stesso file producono lo
//! stesso risultato. Un file che non si riesce a leggere produce
//! `UnreadableSource`, mai un risultato di default.

use crate::config::{AnalysisThresholds, Config};
use crate::document;
use crate::error::{OptimizeError, Result};
use crate::file_manager::{Container, FileReference};
use crate::formats::FileKind;
use crate::image_processor;
use crate::platform::PlatformCommands;
use crate::process;
use crate::video_processor::VideoProcessor;
use serde::Serialize;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How much of a file is image data
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDensity {
    Low,
    Medium,
    High,
}

impl ImageDensity {
    /// Bucket `value` against a `(low, high)` threshold pair
    pub fn bucket(value: f64, low: f64, high: f64) -> Self {
        if value < low {
            Self::Low
        } else if value < high {
            Self::Medium
        } else {
            Self::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ImageDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected size reduction bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SavingsEstimate {
    Low,
    Medium,
    High,
}

impl SavingsEstimate {
    pub fn percent(&self) -> u8 {
        match self {
            Self::Low => 25,
            Self::Medium => 50,
            Self::High => 70,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for SavingsEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (~{}%)", self.as_str(), self.percent())
    }
}

/// Savings follow density unless the file is already optimized
pub fn estimate_savings(density: ImageDensity, already_optimized: bool) -> SavingsEstimate {
    if already_optimized {
        return SavingsEstimate::Low;
    }
    match density {
        ImageDensity::Low => SavingsEstimate::Low,
        ImageDensity::Medium => SavingsEstimate::Medium,
        ImageDensity::High => SavingsEstimate::High,
    }
}

/// Low density, and no detected DPI above the target. A missing DPI does
/// not block the flag.
pub fn is_already_optimized(density: ImageDensity, average_dpi: Option<f64>, target_dpi: u32) -> bool {
    density == ImageDensity::Low && average_dpi.map_or(true, |dpi| dpi <= target_dpi as f64)
}

/// Compressibility prediction for one source
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub page_count: u32,
    pub image_count: u32,
    pub image_density: ImageDensity,
    pub estimated_savings: SavingsEstimate,
    pub is_already_optimized: bool,
    #[serde(rename = "originalDPI")]
    pub original_dpi: Option<f64>,
}

impl AnalysisResult {
    fn from_measure(
        page_count: u32,
        image_count: u32,
        density: ImageDensity,
        average_dpi: Option<f64>,
        original_dpi: Option<f64>,
        thresholds: &AnalysisThresholds,
    ) -> Self {
        let already_optimized = is_already_optimized(density, average_dpi, thresholds.target_dpi);
        Self {
            page_count,
            image_count,
            image_density: density,
            estimated_savings: estimate_savings(density, already_optimized),
            is_already_optimized: already_optimized,
            original_dpi: original_dpi.map(|dpi| dpi.round()),
        }
    }
}

/// Predicts compressibility without converting
#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    thresholds: AnalysisThresholds,
    video: VideoProcessor,
}

impl AnalysisEngine {
    pub fn new(config: &Config, platform: PlatformCommands) -> Self {
        Self {
            thresholds: config.analysis.clone(),
            video: VideoProcessor::new(platform, config),
        }
    }

    pub fn thresholds(&self) -> &AnalysisThresholds {
        &self.thresholds
    }

    /// Analyze `source`. Side-effect free and cancellable.
    pub async fn analyze(&self, source: &FileReference, cancel: &CancellationToken) -> Result<AnalysisResult> {
        if cancel.is_cancelled() {
            return Err(OptimizeError::Cancelled);
        }
        debug!("Analyzing {} ({})", source.name, source.kind);

        let result = match (source.kind, source.container) {
            (FileKind::UnknownBinary, _) => {
                return Err(OptimizeError::unreadable(&source.name, "unrecognized file format"));
            }
            (FileKind::Video, _) => self.analyze_video(source, cancel).await?,
            (FileKind::Image, _) => self.analyze_image(source, cancel).await?,
            (_, Container::Pdf) => self.analyze_pdf(source, cancel).await?,
            (_, Container::Zip) => self.analyze_office(source, cancel).await?,
            (kind, _) => {
                return Err(OptimizeError::unreadable(
                    &source.name,
                    format!("cannot inspect the contents of this {} container", kind),
                ));
            }
        };

        info!(
            "📊 {}: density {}, savings {}{}",
            source.name,
            result.image_density,
            result.estimated_savings,
            if result.is_already_optimized { ", already optimized" } else { "" }
        );
        Ok(result)
    }

    async fn analyze_pdf(&self, source: &FileReference, cancel: &CancellationToken) -> Result<AnalysisResult> {
        let path = source.path.clone();
        let scan = process::blocking(cancel, move |_| document::scan_pdf(&path)).await?;

        let fraction = scan.image_fraction();
        debug!(
            "{}: {} pages, {} images, image fraction {:.3}",
            source.name, scan.page_count, scan.image_count, fraction
        );
        let t = &self.thresholds;
        let density = ImageDensity::bucket(fraction, t.document_low, t.document_high);
        Ok(AnalysisResult::from_measure(
            scan.page_count,
            scan.image_count,
            density,
            scan.average_dpi(),
            scan.largest_image_dpi,
            t,
        ))
    }

    async fn analyze_office(&self, source: &FileReference, cancel: &CancellationToken) -> Result<AnalysisResult> {
        let path = source.path.clone();
        let scan = process::blocking(cancel, move |_| document::scan_office(&path)).await?;

        let fraction = scan.image_fraction();
        let t = &self.thresholds;
        let density = ImageDensity::bucket(fraction, t.document_low, t.document_high);
        Ok(AnalysisResult::from_measure(
            scan.page_count.unwrap_or(1),
            scan.image_count,
            density,
            None,
            None,
            t,
        ))
    }

    async fn analyze_image(&self, source: &FileReference, cancel: &CancellationToken) -> Result<AnalysisResult> {
        let path = source.path.clone();
        let container = source.container;
        let info = process::blocking(cancel, move |_| image_processor::read_info(&path, container)).await?;

        let raw_bytes = info.width as f64 * info.height as f64 * 3.0;
        if raw_bytes <= 0.0 {
            return Err(OptimizeError::unreadable(&source.name, "image has no pixels"));
        }
        let ratio = source.size as f64 / raw_bytes;
        debug!(
            "{}: {}x{}, {:.3} bytes per raw byte",
            source.name, info.width, info.height, ratio
        );

        let t = &self.thresholds;
        let density = ImageDensity::bucket(ratio, t.image_low, t.image_high);
        Ok(AnalysisResult::from_measure(1, 1, density, info.dpi, info.dpi, t))
    }

    async fn analyze_video(&self, source: &FileReference, cancel: &CancellationToken) -> Result<AnalysisResult> {
        let info = self.video.probe(&source.path, cancel).await?;

        // Container bitrate can be missing; fall back to size over duration
        let bits_per_pixel = info.bits_per_pixel().or_else(|| {
            let pixels_per_second = info.width as f64 * info.height as f64 * info.frame_rate;
            (info.duration > 0.0 && pixels_per_second > 0.0)
                .then(|| source.size as f64 * 8.0 / info.duration / pixels_per_second)
        });
        let t = &self.thresholds;
        let density = match bits_per_pixel {
            Some(bpp) => ImageDensity::bucket(bpp, t.video_low, t.video_high),
            None => {
                debug!("{}: no bitrate information, assuming medium density", source.name);
                ImageDensity::Medium
            }
        };

        let frames = u32::try_from(info.frame_count).unwrap_or(u32::MAX);
        Ok(AnalysisResult::from_measure(1, frames, density, None, None, t))
    }
}
