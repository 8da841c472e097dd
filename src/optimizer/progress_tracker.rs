//! # Progress Tracking Module
//!
//! Ciclo di vita di un singolo job come macchina a stati osservabile.
//!
//! ```text
//! preparing → uploading → optimizing → downloading → done
//!      \___________\____________\____________\______→ cancelled | failed
//! ```
//!
//! - Solo `uploading` e `downloading` hanno una frazione in [0, 1]
//! - Ogni transizione in avanti è notificata al massimo una volta
//! - Nessuno stato dopo uno terminale; il tracker è monouso (`claim`)
//! - Eventi su canale `broadcast`, ultimo snapshot su canale `watch`
//! - `cancel()` fa scattare il `CancellationToken` osservato dal motore

use crate::error::{OptimizeError, Result};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

/// Phase of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    Preparing,
    Uploading,
    Optimizing,
    Downloading,
    Done,
    Cancelled,
    Failed,
}

impl ProcessingStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    /// Stages that report a byte fraction
    pub fn is_determinate(&self) -> bool {
        matches!(self, Self::Uploading | Self::Downloading)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Uploading => "uploading",
            Self::Optimizing => "optimizing",
            Self::Downloading => "downloading",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published on every observable change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageChanged { stage: ProcessingStage },
    ProgressUpdated { stage: ProcessingStage, fraction: f64 },
    Failed { reason: String },
    Completed,
}

impl ProgressEvent {
    /// Last event a job publishes
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::StageChanged { stage: ProcessingStage::Cancelled }
        )
    }
}

/// Latest observable state of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub stage: ProcessingStage,
    /// Only set while uploading or downloading
    pub fraction: Option<f64>,
    pub is_converting: bool,
    pub failure: Option<String>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            stage: ProcessingStage::Preparing,
            fraction: None,
            is_converting: false,
            failure: None,
        }
    }
}

struct Shared {
    stage: Mutex<ProcessingStage>,
    claimed: AtomicBool,
    events: broadcast::Sender<ProgressEvent>,
    snapshot: watch::Sender<ProgressSnapshot>,
    cancel: CancellationToken,
}

/// Single-use tracker for one conversion job. Clones share the same job.
#[derive(Clone)]
pub struct ProgressTracker {
    shared: Arc<Shared>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshot, _) = watch::channel(ProgressSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                stage: Mutex::new(ProcessingStage::Preparing),
                claimed: AtomicBool::new(false),
                events,
                snapshot,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.shared.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn stage(&self) -> ProcessingStage {
        *self.lock_stage()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    fn lock_stage(&self) -> std::sync::MutexGuard<'_, ProcessingStage> {
        // A poisoned lock still holds a valid stage
        self.shared.stage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ProgressEvent) {
        // No subscribers is fine
        let _ = self.shared.events.send(event);
    }

    fn publish(&self, stage: ProcessingStage, fraction: Option<f64>, failure: Option<String>) {
        let is_converting = !stage.is_terminal() && stage != ProcessingStage::Preparing;
        self.shared.snapshot.send_replace(ProgressSnapshot {
            stage,
            fraction,
            is_converting,
            failure,
        });
    }

    /// Mark the job as started. Fails if the tracker was already used.
    pub fn claim(&self) -> Result<()> {
        if self.shared.claimed.swap(true, Ordering::SeqCst) {
            return Err(OptimizeError::Validation(
                "progress tracker already used by another job".to_string(),
            ));
        }
        if self.is_cancelled() {
            self.cancel();
            return Err(OptimizeError::Cancelled);
        }
        let stage = self.lock_stage();
        if stage.is_terminal() {
            return Err(OptimizeError::Cancelled);
        }
        self.publish(*stage, None, None);
        self.emit(ProgressEvent::StageChanged { stage: *stage });
        Ok(())
    }

    /// Move forward to `next`. Fails with `Cancelled` once cancellation has
    /// been requested, and rejects backward or repeated transitions.
    pub fn advance(&self, next: ProcessingStage) -> Result<()> {
        if self.is_cancelled() {
            return Err(OptimizeError::Cancelled);
        }
        if matches!(next, ProcessingStage::Cancelled | ProcessingStage::Failed) {
            return Err(OptimizeError::Validation(format!(
                "{} is entered through cancel() or fail()",
                next
            )));
        }

        let mut stage = self.lock_stage();
        if stage.is_terminal() || next <= *stage {
            return Err(OptimizeError::Validation(format!(
                "invalid stage transition {} -> {}",
                *stage, next
            )));
        }
        *stage = next;

        // Published under the lock so a concurrent cancel() is always seen last
        debug!("Stage -> {}", next);
        let fraction = next.is_determinate().then_some(0.0);
        self.publish(next, fraction, None);
        self.emit(ProgressEvent::StageChanged { stage: next });
        if next == ProcessingStage::Done {
            self.emit(ProgressEvent::Completed);
        }
        Ok(())
    }

    /// Report progress of the current determinate stage. Ignored elsewhere.
    pub fn report_progress(&self, fraction: f64) {
        let stage = self.lock_stage();
        if !stage.is_determinate() {
            return;
        }
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.publish(*stage, Some(fraction), None);
        self.emit(ProgressEvent::ProgressUpdated { stage: *stage, fraction });
    }

    /// Enter `done` and publish `Completed`
    pub fn complete(&self) -> Result<()> {
        self.advance(ProcessingStage::Done)
    }

    /// Request cancellation. Enters `cancelled` unless already terminal.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
        let mut stage = self.lock_stage();
        if stage.is_terminal() {
            return;
        }
        *stage = ProcessingStage::Cancelled;

        debug!("Stage -> cancelled");
        self.publish(ProcessingStage::Cancelled, None, None);
        self.emit(ProgressEvent::StageChanged {
            stage: ProcessingStage::Cancelled,
        });
    }

    /// Enter `failed` with `reason`, unless already terminal
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut stage = self.lock_stage();
        if stage.is_terminal() {
            return;
        }
        *stage = ProcessingStage::Failed;

        debug!("Stage -> failed: {}", reason);
        self.publish(ProcessingStage::Failed, None, Some(reason.clone()));
        self.emit(ProgressEvent::StageChanged {
            stage: ProcessingStage::Failed,
        });
        self.emit(ProgressEvent::Failed { reason });
    }

    /// Route an engine error to the matching terminal state
    pub fn finish_with_error(&self, err: &OptimizeError) {
        if err.is_cancelled() {
            self.cancel();
        } else {
            self.fail(err.to_string());
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("stage", &self.stage())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_happy_path_emits_each_stage_once() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();

        tracker.claim().unwrap();
        tracker.advance(ProcessingStage::Uploading).unwrap();
        tracker.report_progress(0.5);
        tracker.advance(ProcessingStage::Optimizing).unwrap();
        tracker.report_progress(0.9);
        tracker.advance(ProcessingStage::Downloading).unwrap();
        tracker.report_progress(1.0);
        tracker.complete().unwrap();

        let stages: Vec<ProcessingStage> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::StageChanged { stage } => Some(stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                ProcessingStage::Preparing,
                ProcessingStage::Uploading,
                ProcessingStage::Optimizing,
                ProcessingStage::Downloading,
                ProcessingStage::Done
            ]
        );
        assert_eq!(tracker.stage(), ProcessingStage::Done);
        assert!(!tracker.snapshot().is_converting);
    }

    #[test]
    fn test_optimizing_is_indeterminate() {
        let tracker = ProgressTracker::new();
        tracker.claim().unwrap();
        tracker.advance(ProcessingStage::Optimizing).unwrap();
        tracker.report_progress(0.4);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.fraction, None);
        assert!(snapshot.is_converting);
    }

    #[test]
    fn test_fraction_is_clamped() {
        let tracker = ProgressTracker::new();
        tracker.claim().unwrap();
        tracker.advance(ProcessingStage::Uploading).unwrap();
        tracker.report_progress(1.7);
        assert_eq!(tracker.snapshot().fraction, Some(1.0));
        tracker.report_progress(f64::NAN);
        assert_eq!(tracker.snapshot().fraction, Some(0.0));
    }

    #[test]
    fn test_no_backward_or_repeated_transitions() {
        let tracker = ProgressTracker::new();
        tracker.claim().unwrap();
        tracker.advance(ProcessingStage::Optimizing).unwrap();
        assert!(tracker.advance(ProcessingStage::Optimizing).is_err());
        assert!(tracker.advance(ProcessingStage::Uploading).is_err());
        assert!(tracker.advance(ProcessingStage::Failed).is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let tracker = ProgressTracker::new();
        tracker.claim().unwrap();
        tracker.fail("boom");
        tracker.cancel();
        assert_eq!(tracker.stage(), ProcessingStage::Failed);
        assert_eq!(tracker.snapshot().failure.as_deref(), Some("boom"));
        assert!(tracker.advance(ProcessingStage::Done).is_err());
    }

    #[test]
    fn test_cancel_from_preparing() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();
        tracker.claim().unwrap();
        tracker.cancel();

        assert_eq!(tracker.stage(), ProcessingStage::Cancelled);
        assert!(tracker.cancellation_token().is_cancelled());
        assert!(matches!(
            tracker.advance(ProcessingStage::Uploading),
            Err(OptimizeError::Cancelled)
        ));
        assert_eq!(
            drain(&mut rx).last(),
            Some(&ProgressEvent::StageChanged {
                stage: ProcessingStage::Cancelled
            })
        );
    }

    #[test]
    fn test_cancel_racing_the_job_stays_last() {
        for _ in 0..2_000 {
            let tracker = ProgressTracker::new();
            let mut rx = tracker.subscribe();
            tracker.claim().unwrap();
            tracker.advance(ProcessingStage::Uploading).unwrap();

            std::thread::scope(|scope| {
                let worker = tracker.clone();
                scope.spawn(move || {
                    for _ in 0..5 {
                        worker.report_progress(0.5);
                    }
                    let _ = worker.advance(ProcessingStage::Optimizing);
                });
                let canceller = tracker.clone();
                scope.spawn(move || canceller.cancel());
            });

            assert_eq!(tracker.stage(), ProcessingStage::Cancelled);
            assert_eq!(tracker.snapshot().stage, ProcessingStage::Cancelled);
            let events = drain(&mut rx);
            assert_eq!(
                events.last(),
                Some(&ProgressEvent::StageChanged {
                    stage: ProcessingStage::Cancelled
                })
            );
        }
    }

    #[test]
    fn test_tracker_is_single_use() {
        let tracker = ProgressTracker::new();
        tracker.claim().unwrap();
        assert!(matches!(tracker.claim(), Err(OptimizeError::Validation(_))));
    }

    #[test]
    fn test_failure_event_carries_reason() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();
        tracker.claim().unwrap();
        tracker.finish_with_error(&OptimizeError::codec("ffmpeg", "exit status 1"));

        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Failed { reason }) if reason.contains("exit status 1")
        ));
    }

    #[tokio::test]
    async fn test_watch_sees_latest_snapshot() {
        let tracker = ProgressTracker::new();
        let mut watcher = tracker.watch();
        tracker.claim().unwrap();
        tracker.advance(ProcessingStage::Uploading).unwrap();
        tracker.report_progress(0.25);

        watcher.changed().await.unwrap();
        let snapshot = watcher.borrow_and_update().clone();
        assert_eq!(snapshot.stage, ProcessingStage::Uploading);
        assert_eq!(snapshot.fraction, Some(0.25));
    }
}
