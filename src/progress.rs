//! # Terminal Progress Module
//!
//! Rendering su terminale degli eventi del `ProgressTracker` con `indicatif`.
//!
//! ## Responsabilità:
//! - Barra con percentuale per gli stadi determinati (`uploading`,
//!   `downloading`)
//! - Spinner per `preparing` e `optimizing`, che non hanno frazione
//! - Messaggio finale per `done`, `cancelled`, `failed`
//! - Riepilogo del job (dimensioni prima/dopo, percentuale risparmiata)
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:00:04] [========================>---------------] 61% 📥 staging scan.pdf
//! ⠙ [00:00:09] ⚙️ optimizing scan.pdf
//! ✅ done scan.pdf
//! ```

use crate::file_manager::FileManager;
use crate::optimizer::progress_tracker::{ProcessingStage, ProgressEvent, ProgressTracker};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {msg}";

/// Short label shown next to the bar for each stage
pub fn stage_message(stage: ProcessingStage) -> &'static str {
    match stage {
        ProcessingStage::Preparing => "🔍 preparing",
        ProcessingStage::Uploading => "📥 staging",
        ProcessingStage::Optimizing => "⚙️ optimizing",
        ProcessingStage::Downloading => "📤 collecting output",
        ProcessingStage::Done => "✅ done",
        ProcessingStage::Cancelled => "🛑 cancelled",
        ProcessingStage::Failed => "❌ failed",
    }
}

/// Terminal view of one job
#[derive(Clone)]
pub struct JobProgress {
    bar: ProgressBar,
    label: String,
}

impl JobProgress {
    pub fn new(label: impl Into<String>) -> Self {
        let bar = ProgressBar::new(100);
        bar.enable_steady_tick(Duration::from_millis(100));
        let progress = Self {
            bar,
            label: label.into(),
        };
        progress.show_stage(ProcessingStage::Preparing);
        progress
    }

    /// Render events from `tracker` until the job ends
    pub fn attach(self, tracker: &ProgressTracker) -> JoinHandle<()> {
        let mut events = tracker.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if self.apply(&event) {
                            break;
                        }
                    }
                    // Missed fractions are harmless, the next event catches up
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Update the view. Returns true once the job has ended.
    fn apply(&self, event: &ProgressEvent) -> bool {
        match event {
            ProgressEvent::StageChanged { stage } => {
                self.show_stage(*stage);
                *stage == ProcessingStage::Cancelled
            }
            ProgressEvent::ProgressUpdated { fraction, .. } => {
                self.bar.set_position((fraction * 100.0).round() as u64);
                false
            }
            ProgressEvent::Failed { reason } => {
                self.bar
                    .abandon_with_message(format!("{} {}: {}", stage_message(ProcessingStage::Failed), self.label, reason));
                true
            }
            ProgressEvent::Completed => {
                self.bar
                    .finish_with_message(format!("{} {}", stage_message(ProcessingStage::Done), self.label));
                true
            }
        }
    }

    fn show_stage(&self, stage: ProcessingStage) {
        let template = if stage.is_determinate() { BAR_TEMPLATE } else { SPINNER_TEMPLATE };
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            self.bar.set_style(style.progress_chars("=>-"));
        }
        if stage.is_determinate() {
            self.bar.set_position(0);
        }
        let message = format!("{} {}", stage_message(stage), self.label);
        if stage == ProcessingStage::Cancelled {
            self.bar.abandon_with_message(message);
        } else {
            self.bar.set_message(message);
        }
    }

    /// Spinner for work that is not a tracked job, such as analysis
    pub fn spinner(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}

/// One-line summary of a finished job
pub fn format_summary(original_size: u64, compressed_size: u64, savings_percent: u8, artifacts: usize) -> String {
    format!(
        "{} → {} | saved {}% | {} file(s) written",
        FileManager::format_size(original_size),
        FileManager::format_size(compressed_size),
        savings_percent,
        artifacts
    )
}
