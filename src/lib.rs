//! # fisheye-dewarp
//!
//! Batch conversion of fisheye videos into rectilinear ones.
//!
//! Every video in a folder is decoded frame by frame, re-projected through a
//! precomputed per-pixel lookup table and written next to the source with a
//! `_dewarped` suffix.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use fisheye_dewarp::{
//!     batch::{BatchProcessor, CancelToken, LogSink},
//!     projection::{DewarpConfig, Layout, Projection},
//!     video::FfmpegBackend,
//! };
//!
//! # fn main() -> fisheye_dewarp::Result<()> {
//! let backend = FfmpegBackend::new();
//! backend.check_available()?;
//!
//! let config = DewarpConfig::new(Projection::Stereographic, Layout::Circular, 180.0, 120.0);
//! let processor = BatchProcessor::new(Arc::new(backend));
//! let report = processor.run(Path::new("videos/"), config, &mut LogSink::new(), &CancelToken::new())?;
//!
//! println!("{} of {} frames", report.processed_frames, report.total_frames);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`projection`] - Lens models and projection maps
//! - [`video`] - Frames, folder scan, FFmpeg backend and frame transform
//! - [`batch`] - Run orchestration, progress and cancellation
//! - [`config`] - Configuration management
//!
//! ## Custom Backends
//!
//! Container I/O goes through the [`VideoBackend`](video::VideoBackend)
//! trait, so the batch processor can run against any decoder/encoder pair.

pub mod batch;
pub mod config;
pub mod error;
pub mod projection;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    batch::{BatchProcessor, CancelToken, ProgressSink, RunReport},
    config::Config,
    error::{DewarpError, Result},
    projection::{DewarpConfig, ProjectionMap},
    video::{Frame, FrameTransformer, VideoBackend},
};
