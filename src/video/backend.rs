use std::path::Path;

use crate::error::Result;
use crate::video::types::{Frame, FrameRate, VideoMetadata};

/// Sequential frame reader for one open video
pub trait FrameDecoder: Send {
    /// Stream properties of the video being decoded
    fn metadata(&self) -> &VideoMetadata;

    /// Next frame in decode order, `None` once the stream is exhausted
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying stream
    fn close(self: Box<Self>) -> Result<()>;
}

/// Sequential frame writer for one output video
pub trait FrameEncoder: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and finalize the container
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Output stream parameters, copied from the source so that frame rate and
/// dimensions round-trip exactly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
}

impl EncoderSettings {
    pub fn from_metadata(metadata: &VideoMetadata) -> Self {
        Self {
            width: metadata.width,
            height: metadata.height,
            frame_rate: metadata.frame_rate,
        }
    }
}

/// Video container I/O used by the batch processor
pub trait VideoBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Read stream properties without decoding frames
    fn probe(&self, path: &Path) -> Result<VideoMetadata>;

    /// Open a video for decoding. `metadata` is the result of an earlier
    /// probe, if there was one.
    fn open_decoder(
        &self,
        path: &Path,
        metadata: Option<&VideoMetadata>,
    ) -> Result<Box<dyn FrameDecoder>>;

    /// Create (or truncate) an output video
    fn open_encoder(&self, path: &Path, settings: &EncoderSettings) -> Result<Box<dyn FrameEncoder>>;
}
