//! # Batch Module
//!
//! Folder-level orchestration: scanning, frame counting, per-video
//! processing, progress reporting and cancellation.

pub mod cancel;
pub mod processor;
pub mod progress;
pub mod run;

pub use cancel::CancelToken;
pub use processor::BatchProcessor;
pub use progress::{ChannelSink, LogSink, ProgressEvent, ProgressSink};
pub use run::{AbortReason, BatchRun, RunReport, RunState, RunStatus, SkipEvent, SkipKind};
