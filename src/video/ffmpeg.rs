use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Result, VideoError};
use crate::video::backend::{EncoderSettings, FrameDecoder, FrameEncoder, VideoBackend};
use crate::video::types::{Frame, FrameRate, VideoMetadata};

/// Video backend driving external `ffmpeg` / `ffprobe` processes
///
/// Frames travel as packed `rgb24` over the child processes' stdin/stdout, so
/// no FFmpeg libraries need to be linked.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    codec: String,
    quality: u8,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            codec: "libx264".to_string(),
            quality: 85,
        }
    }
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries<P: Into<PathBuf>>(mut self, ffmpeg: P, ffprobe: P) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    /// Output codec and quality (0-100, higher is better)
    pub fn with_codec<S: Into<String>>(mut self, codec: S, quality: u8) -> Self {
        self.codec = codec.into();
        self.quality = quality.min(100);
        self
    }

    /// Fail early when either binary is missing
    pub fn check_available(&self) -> Result<()> {
        for binary in [&self.ffmpeg, &self.ffprobe] {
            let ok = Command::new(binary)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false);

            if !ok {
                return Err(VideoError::BackendUnavailable {
                    reason: format!("`{}` could not be run", binary.display()),
                }
                .into());
            }
        }

        info!("Using {} and {}", self.ffmpeg.display(), self.ffprobe.display());
        Ok(())
    }

    fn quality_to_crf(quality: u8) -> u8 {
        (51 - ((quality as f32 / 100.0) * 51.0) as u8).clamp(0, 51)
    }

    fn spawn_error(&self, binary: &Path, err: std::io::Error) -> VideoError {
        VideoError::BackendUnavailable {
            reason: format!("failed to start {}: {}", binary.display(), err),
        }
    }
}

impl VideoBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn probe(&self, path: &Path) -> Result<VideoMetadata> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames,duration,codec_name\
                 :stream_tags=rotate:stream_side_data=rotation",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .map_err(|e| self.spawn_error(&self.ffprobe, e))?;

        if !output.status.success() {
            return Err(VideoError::ProbeFailed {
                path: path.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let metadata = parse_probe_output(&String::from_utf8_lossy(&output.stdout), path)?;
        debug!(
            "Probed {}: {}x{} @ {} fps, {} frames ({})",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.frame_rate,
            metadata.frame_count,
            metadata.codec
        );
        Ok(metadata)
    }

    fn open_decoder(
        &self,
        path: &Path,
        metadata: Option<&VideoMetadata>,
    ) -> Result<Box<dyn FrameDecoder>> {
        let metadata = match metadata {
            Some(metadata) => metadata.clone(),
            None => self.probe(path).map_err(|e| VideoError::UnreadableVideo {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
        };

        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(&self.ffmpeg, e))?;

        let stdout = child.stdout.take().ok_or_else(|| VideoError::UnreadableVideo {
            path: path.display().to_string(),
            reason: "decoder produced no output pipe".to_string(),
        })?;
        let stderr = drain_stderr(&mut child);

        Ok(Box::new(FfmpegDecoder {
            frame_bytes: Frame::byte_len(metadata.width, metadata.height),
            metadata,
            child,
            stdout: BufReader::new(stdout),
            stderr,
            finished: false,
        }))
    }

    fn open_encoder(&self, path: &Path, settings: &EncoderSettings) -> Result<Box<dyn FrameEncoder>> {
        // 4:2:0 chroma needs even dimensions
        let pix_fmt = if settings.width % 2 == 0 && settings.height % 2 == 0 {
            "yuv420p"
        } else {
            "yuv444p"
        };
        let crf = Self::quality_to_crf(self.quality).to_string();
        let size = format!("{}x{}", settings.width, settings.height);
        let rate = settings.frame_rate.to_string();

        let mut child = Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &size, "-r", &rate, "-i", "pipe:0", "-an"])
            .args(["-c:v", &self.codec, "-crf", &crf, "-pix_fmt", pix_fmt, "-r", &rate])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(&self.ffmpeg, e))?;

        let stdin = child.stdin.take().ok_or_else(|| VideoError::EncodingFailed {
            reason: "encoder produced no input pipe".to_string(),
        })?;
        let stderr = drain_stderr(&mut child);

        debug!(
            "Encoding {} with {} ({}, crf {}) at {} fps",
            path.display(),
            self.codec,
            pix_fmt,
            crf,
            rate
        );

        Ok(Box::new(FfmpegEncoder {
            child,
            stdin: Some(BufWriter::new(stdin)),
            stderr,
            settings: *settings,
            finished: false,
        }))
    }
}

/// Decoder reading raw frames from an `ffmpeg` child process
pub struct FfmpegDecoder {
    metadata: VideoMetadata,
    frame_bytes: usize,
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

impl FrameDecoder for FfmpegDecoder {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.frame_bytes];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => Frame::from_rgb_bytes(self.metadata.width, self.metadata.height, buffer)
                .map(Some)
                .ok_or_else(|| {
                    VideoError::DecodingFailed {
                        reason: "frame buffer has the wrong size".to_string(),
                    }
                    .into()
                }),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finished = true;
                let status = self.child.wait()?;
                let stderr = join_stderr(self.stderr.take());
                if status.success() {
                    Ok(None)
                } else {
                    Err(VideoError::DecodingFailed {
                        reason: format!("ffmpeg exited with {}: {}", status, stderr),
                    }
                    .into())
                }
            }
            Err(e) => Err(VideoError::DecodingFailed {
                reason: e.to_string(),
            }
            .into()),
        }
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        if !self.finished {
            // stopped before the end of the stream
            self.finished = true;
            let _ = self.child.kill();
            self.child.wait()?;
        }
        join_stderr(self.stderr.take());
        Ok(())
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Encoder writing raw frames into an `ffmpeg` child process
pub struct FfmpegEncoder {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr: Option<JoinHandle<String>>,
    settings: EncoderSettings,
    finished: bool,
}

impl FfmpegEncoder {
    /// Stop the child and turn its stderr into an error
    fn fail(&mut self, reason: String) -> VideoError {
        self.stdin = None;
        self.finished = true;
        let _ = self.child.kill();
        let _ = self.child.wait();
        let stderr = join_stderr(self.stderr.take());
        VideoError::EncodingFailed {
            reason: if stderr.is_empty() {
                reason
            } else {
                format!("{}: {}", reason, stderr)
            },
        }
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.dimensions() != (self.settings.width, self.settings.height) {
            return Err(VideoError::EncodingFailed {
                reason: format!(
                    "frame is {}x{}, stream is {}x{}",
                    frame.width(),
                    frame.height(),
                    self.settings.width,
                    self.settings.height
                ),
            }
            .into());
        }

        let written = match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(frame.as_rgb_bytes()),
            None => Err(std::io::Error::new(ErrorKind::BrokenPipe, "encoder already closed")),
        };
        written.map_err(|e| self.fail(e.to_string()).into())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.flush() {
                return Err(self.fail(e.to_string()).into());
            }
        }

        self.finished = true;
        let status = self.child.wait()?;
        let stderr = join_stderr(self.stderr.take());
        if !status.success() {
            return Err(VideoError::EncodingFailed {
                reason: format!("ffmpeg exited with {}: {}", status, stderr),
            }
            .into());
        }
        if !stderr.is_empty() {
            warn!("ffmpeg: {}", stderr);
        }
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if !self.finished {
            self.stdin = None;
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Read a child's stderr on a helper thread so a chatty process never blocks
/// on a full pipe
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    Some(std::thread::spawn(move || {
        let mut text = String::new();
        let _ = stderr.read_to_string(&mut text);
        text
    }))
}

fn join_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    codec_name: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

impl ProbeStream {
    /// Display rotation in degrees, from the display matrix or the legacy tag
    fn rotation(&self) -> f64 {
        self.side_data_list
            .iter()
            .find_map(|side_data| side_data.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|tags| tags.rotate.as_deref())
                    .and_then(|rotate| rotate.trim().parse().ok())
            })
            .unwrap_or(0.0)
    }
}

/// Turn `ffprobe -of json` output into stream metadata
fn parse_probe_output(json: &str, path: &Path) -> Result<VideoMetadata> {
    let failed = |reason: String| VideoError::ProbeFailed {
        path: path.display().to_string(),
        reason,
    };

    let probe: ProbeOutput =
        serde_json::from_str(json).map_err(|e| failed(format!("invalid ffprobe output: {}", e)))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| failed("no video stream".to_string()))?;

    let (mut width, mut height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(failed("video stream has no dimensions".to_string()).into()),
    };

    // ffmpeg autorotates while decoding, so quarter turns arrive transposed
    let rotation = stream.rotation();
    if (rotation.round() as i64).rem_euclid(180) == 90 {
        std::mem::swap(&mut width, &mut height);
        debug!("{} is rotated {}°, decoding as {}x{}", path.display(), rotation, width, height);
    }

    let frame_rate = stream
        .r_frame_rate
        .as_deref()
        .and_then(FrameRate::parse)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(FrameRate::parse))
        .ok_or_else(|| failed("video stream has no frame rate".to_string()))?;

    let frame_count = match stream.nb_frames.as_deref().and_then(|n| n.parse::<u64>().ok()) {
        Some(count) => count,
        None => stream
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .map(|seconds| (seconds * frame_rate.as_f64()).round().max(0.0) as u64)
            .unwrap_or(0),
    };

    Ok(VideoMetadata {
        width,
        height,
        frame_rate,
        frame_count,
        codec: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "programs": [],
            "streams": [{
                "codec_name": "h264",
                "width": 640,
                "height": 480,
                "r_frame_rate": "30000/1001",
                "avg_frame_rate": "30000/1001",
                "duration": "10.010000",
                "nb_frames": "300"
            }]
        }"#;

        let metadata = parse_probe_output(json, Path::new("clip.mp4")).unwrap();
        assert_eq!((metadata.width, metadata.height), (640, 480));
        assert_eq!(metadata.frame_rate, FrameRate::new(30000, 1001));
        assert_eq!(metadata.frame_count, 300);
        assert_eq!(metadata.codec, "h264");
    }

    #[test]
    fn test_frame_count_falls_back_to_duration() {
        let json = r#"{"streams": [{"width": 320, "height": 240, "r_frame_rate": "0/0",
            "avg_frame_rate": "25/1", "duration": "2.0"}]}"#;

        let metadata = parse_probe_output(json, Path::new("clip.mkv")).unwrap();
        assert_eq!(metadata.frame_rate, FrameRate::new(25, 1));
        assert_eq!(metadata.frame_count, 50);
        assert_eq!(metadata.codec, "unknown");
    }

    #[test]
    fn test_quarter_turn_rotation_swaps_dimensions() {
        let json = r#"{"streams": [{"width": 1920, "height": 1080, "r_frame_rate": "30/1",
            "nb_frames": "90",
            "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]}]}"#;
        let metadata = parse_probe_output(json, Path::new("phone.mp4")).unwrap();
        assert_eq!((metadata.width, metadata.height), (1080, 1920));

        let json = r#"{"streams": [{"width": 1920, "height": 1080, "r_frame_rate": "30/1",
            "tags": {"rotate": "270"}}]}"#;
        let metadata = parse_probe_output(json, Path::new("old_phone.mp4")).unwrap();
        assert_eq!((metadata.width, metadata.height), (1080, 1920));

        let json = r#"{"streams": [{"width": 1920, "height": 1080, "r_frame_rate": "30/1",
            "side_data_list": [{"rotation": 180}]}]}"#;
        let metadata = parse_probe_output(json, Path::new("upside_down.mp4")).unwrap();
        assert_eq!((metadata.width, metadata.height), (1920, 1080));
    }

    #[test]
    fn test_probe_without_video_stream_fails() {
        let err = parse_probe_output(r#"{"streams": []}"#, Path::new("audio.mp4")).unwrap_err();
        assert!(err.to_string().contains("no video stream"));

        assert!(parse_probe_output("not json", Path::new("x.mp4")).is_err());
    }

    #[test]
    fn test_quality_to_crf() {
        assert_eq!(FfmpegBackend::quality_to_crf(100), 0);
        assert_eq!(FfmpegBackend::quality_to_crf(0), 51);
        assert_eq!(FfmpegBackend::quality_to_crf(85), 8);
    }
}
