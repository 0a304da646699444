use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    projection::DewarpConfig,
    video::FfmpegBackend,
};

/// Main configuration for fisheye-dewarp
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Last folder that was processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<PathBuf>,

    /// Lens and output parameters
    pub dewarp: DewarpConfig,

    /// Container and encoder settings
    pub video: VideoConfig,

    /// Worker settings
    pub processing: ProcessingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into(),
            _ => crate::error::DewarpError::from(e),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            reason: e.message().to_string(),
        })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::WriteFailed {
            reason: e.to_string(),
        })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.dewarp.validate()?;
        self.video.validate()?;
        self.processing.validate()?;
        Ok(())
    }
}

/// Video container configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// File extensions picked up by the folder scan
    pub extensions: Vec<String>,

    /// FFmpeg encoder name
    pub codec: String,

    /// Output quality (0-100)
    pub quality: u8,

    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["mp4".to_string()],
            codec: "libx264".to_string(),
            quality: 85,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

impl VideoConfig {
    fn validate(&self) -> Result<()> {
        if self.extensions.iter().all(|ext| ext.trim_start_matches('.').is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: "video.extensions".to_string(),
                value: format!("{:?}", self.extensions),
            }
            .into());
        }

        if self.codec.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "video.codec".to_string(),
                value: self.codec.clone(),
            }
            .into());
        }

        if self.quality > 100 {
            return Err(ConfigError::InvalidValue {
                key: "video.quality".to_string(),
                value: self.quality.to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Build the FFmpeg backend described by these settings
    pub fn backend(&self) -> FfmpegBackend {
        FfmpegBackend::new()
            .with_binaries(self.ffmpeg_path.clone(), self.ffprobe_path.clone())
            .with_codec(self.codec.clone(), self.quality)
    }
}

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Threads used for per-frame sampling
    pub threads: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
        }
    }
}

impl ProcessingConfig {
    fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "processing.threads".to_string(),
                value: self.threads.to_string(),
            }
            .into());
        }

        Ok(())
    }
}
