use std::ffi::OsString;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// File-name marker carried by every dewarped output
pub const DEWARPED_MARKER: &str = "_dewarped";

/// Represents a single video frame
///
/// A thin wrapper around an RGB image buffer; decoders produce these and
/// encoders consume them.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    buffer: RgbImage,
}

impl Frame {
    /// Create a new frame from an RGB image buffer
    pub fn new(buffer: RgbImage) -> Self {
        Self { buffer }
    }

    /// Create a new frame with the given dimensions filled with black
    pub fn new_black(width: u32, height: u32) -> Self {
        Self {
            buffer: ImageBuffer::new(width, height),
        }
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let buffer = ImageBuffer::from_fn(width, height, |_, _| Rgb(color));
        Self { buffer }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// Get a pixel at the given coordinates (returns RGB array)
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.buffer.get_pixel(x, y).0
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        self.buffer.put_pixel(x, y, Rgb(color));
    }

    /// Get the underlying image buffer
    pub fn as_image(&self) -> &RgbImage {
        &self.buffer
    }

    /// Packed `rgb24` bytes, row-major
    pub fn as_rgb_bytes(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    /// Create a frame from packed `rgb24` bytes
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|buffer| Self { buffer })
    }

    /// Size in bytes of one packed `rgb24` frame
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    /// Save the frame as a PNG file
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<(), image::ImageError> {
        self.buffer.save_with_format(path, image::ImageFormat::Png)
    }
}

/// Exact frame rate as declared by the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Parse an ffmpeg-style rational such as `30000/1001` or `25`
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (num, den) = match text.split_once('/') {
            Some((num, den)) => (num.trim().parse().ok()?, den.trim().parse().ok()?),
            None => (text.parse().ok()?, 1),
        };

        if num == 0 || den == 0 {
            return None;
        }
        Some(Self { num, den })
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self { num: 30, den: 1 }
    }
}

impl std::fmt::Display for FrameRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Stream properties of a video file
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// Declared number of frames (0 when the container does not say)
    pub frame_count: u64,
    pub codec: String,
}

/// One input video and the output it will be dewarped into
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTask {
    /// Source video
    pub input: PathBuf,

    /// Destination, `input` with `_dewarped` before the extension
    pub output: PathBuf,

    /// Declared frame count, filled in by the pre-scan
    pub frame_count: u64,

    /// Stream properties, `None` until probed or when probing failed
    pub metadata: Option<VideoMetadata>,
}

impl VideoTask {
    pub fn new<P: Into<PathBuf>>(input: P) -> Self {
        let input = input.into();
        let output = output_path_for(&input);
        Self {
            input,
            output,
            frame_count: 0,
            metadata: None,
        }
    }

    /// Display name of the input file
    pub fn name(&self) -> String {
        self.input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input.display().to_string())
    }
}

/// Derive the output path by inserting `_dewarped` before the extension
pub fn output_path_for(input: &Path) -> PathBuf {
    let mut name = OsString::new();
    if let Some(stem) = input.file_stem() {
        name.push(stem);
    }
    name.push(DEWARPED_MARKER);
    if let Some(extension) = input.extension() {
        name.push(".");
        name.push(extension);
    }
    input.with_file_name(name)
}

/// Whether a file name carries the dewarped-output marker
pub fn is_dewarped_output(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.contains(DEWARPED_MARKER))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_inserts_marker_before_extension() {
        assert_eq!(
            output_path_for(Path::new("/videos/clip.mp4")),
            PathBuf::from("/videos/clip_dewarped.mp4")
        );
        assert_eq!(
            output_path_for(Path::new("trip.2024.MP4")),
            PathBuf::from("trip.2024_dewarped.MP4")
        );
        assert_eq!(
            output_path_for(Path::new("raw")),
            PathBuf::from("raw_dewarped")
        );
    }

    #[test]
    fn test_dewarped_marker_detection() {
        assert!(is_dewarped_output(Path::new("clip_dewarped.mp4")));
        assert!(is_dewarped_output(Path::new("/a/b/clip_dewarped_dewarped.mp4")));
        assert!(!is_dewarped_output(Path::new("clip.mp4")));
        assert!(is_dewarped_output(&output_path_for(Path::new("clip.mp4"))));
    }

    #[test]
    fn test_frame_rate_parse() {
        assert_eq!(FrameRate::parse("30000/1001"), Some(FrameRate::new(30000, 1001)));
        assert_eq!(FrameRate::parse("25"), Some(FrameRate::new(25, 1)));
        assert_eq!(FrameRate::parse("0/0"), None);
        assert_eq!(FrameRate::parse("abc"), None);
        assert!((FrameRate::new(30000, 1001).as_f64() - 29.97).abs() < 0.01);
        assert_eq!(FrameRate::new(24, 1).to_string(), "24/1");
    }

    #[test]
    fn test_frame_bytes_round_trip() {
        let frame = Frame::new_filled(4, 3, [10, 20, 30]);
        assert_eq!(frame.as_rgb_bytes().len(), Frame::byte_len(4, 3));

        let rebuilt = Frame::from_rgb_bytes(4, 3, frame.as_rgb_bytes().to_vec()).unwrap();
        assert_eq!(rebuilt, frame);
        assert!(Frame::from_rgb_bytes(4, 3, vec![0; 5]).is_none());
    }
}
