//! # Optimizer Module
//!
//! Servizio di alto livello diviso in sottomoduli:
//! - `file_optimizer`: facciata per un job (inspect, analyze, optimize)
//! - `progress_tracker`: macchina a stati del job con cancellazione
//! - `path_resolver`: path di output degli artifact

pub mod file_optimizer;
pub mod path_resolver;
pub mod progress_tracker;

pub use file_optimizer::{FileOptimizer, JobOutcome, JobRequest};
pub use path_resolver::PathResolver;
pub use progress_tracker::{ProcessingStage, ProgressEvent, ProgressSnapshot, ProgressTracker};
