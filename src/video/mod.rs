//! # Video Processing Module
//!
//! Frames, folder scanning, the container backend seam and the per-frame
//! dewarp transform.

pub mod backend;
pub mod ffmpeg;
pub mod scan;
pub mod transform;
pub mod types;

pub use backend::{EncoderSettings, FrameDecoder, FrameEncoder, VideoBackend};
pub use ffmpeg::FfmpegBackend;
pub use scan::scan_folder;
pub use transform::FrameTransformer;
pub use types::{output_path_for, Frame, FrameRate, VideoMetadata, VideoTask};
