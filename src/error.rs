use thiserror::Error;

/// Main error type for the fisheye-dewarp library
#[derive(Error, Debug)]
pub enum DewarpError {
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Video processing error: {0}")]
    Video(#[from] VideoError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Errors raised while building or applying a projection map
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("Invalid lens configuration: {details}")]
    InvalidConfig { details: String },

    #[error("Frame is {}x{} but the projection map was built for {}x{}", actual.0, actual.1, expected.0, expected.1)]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Video container errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Could not open video {path}: {reason}")]
    UnreadableVideo { path: String, reason: String },

    #[error("Could not read stream info from {path}: {reason}")]
    ProbeFailed { path: String, reason: String },

    #[error("Video decoding failed: {reason}")]
    DecodingFailed { reason: String },

    #[error("Video encoding failed: {reason}")]
    EncodingFailed { reason: String },

    #[error("Video backend unavailable: {reason}")]
    BackendUnavailable { reason: String },
}

/// Batch orchestration errors
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Not a readable directory: {path}")]
    InvalidFolder { path: String },

    #[error("Worker terminated unexpectedly: {reason}")]
    WorkerFailed { reason: String },

    #[error("Illegal run state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to write configuration: {reason}")]
    WriteFailed { reason: String },
}

/// Convenience type alias for Results using DewarpError
pub type Result<T> = std::result::Result<T, DewarpError>;

impl DewarpError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Check if this error only affects a single video and the batch can go on
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Video(VideoError::UnreadableVideo { .. })
            | Self::Video(VideoError::ProbeFailed { .. })
            | Self::Video(VideoError::DecodingFailed { .. })
            | Self::Video(VideoError::EncodingFailed { .. }) => true,
            // A map linked to the wrong frame size is a bug, never retried
            Self::Projection(ProjectionError::DimensionMismatch { .. }) => false,
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Batch(BatchError::InvalidFolder { path }) => {
                format!("'{}' is not a folder. Please select a valid folder.", path)
            }
            Self::Projection(ProjectionError::InvalidConfig { details }) => {
                format!("The lens parameters are invalid: {}", details)
            }
            Self::Video(VideoError::BackendUnavailable { .. }) => {
                "FFmpeg was not found. Please install FFmpeg and make sure `ffmpeg` and `ffprobe` are on the PATH.".to_string()
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_video_is_recoverable() {
        let err: DewarpError = VideoError::UnreadableVideo {
            path: "broken.mp4".to_string(),
            reason: "moov atom not found".to_string(),
        }
        .into();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let err: DewarpError = ProjectionError::DimensionMismatch {
            expected: (640, 480),
            actual: (320, 240),
        }
        .into();
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("320x240"));
        assert!(err.to_string().contains("640x480"));
    }

    #[test]
    fn test_missing_backend_is_fatal() {
        let err: DewarpError = VideoError::BackendUnavailable {
            reason: "ffmpeg not found".to_string(),
        }
        .into();
        assert!(!err.is_recoverable());

        let err: DewarpError = VideoError::EncodingFailed {
            reason: "broken pipe".to_string(),
        }
        .into();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_user_message_for_folder() {
        let err: DewarpError = BatchError::InvalidFolder {
            path: "/nope".to_string(),
        }
        .into();
        assert!(err.user_message().contains("/nope"));
    }
}
