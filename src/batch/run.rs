use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{BatchError, Result};
use crate::video::types::VideoTask;

/// Why a video was left out of the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipKind {
    /// The decoder could not be opened
    UnreadableVideo,
    /// The output could not be created
    EncoderFailed,
    /// Decoding stopped partway through the file
    DecodeFailed,
    /// Writing or finalizing the output failed
    EncodeFailed,
}

impl fmt::Display for SkipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UnreadableVideo => "unreadable video",
            Self::EncoderFailed => "encoder failed to open",
            Self::DecodeFailed => "decoding failed",
            Self::EncodeFailed => "encoding failed",
        };
        f.write_str(text)
    }
}

/// A video that could not be (fully) dewarped
#[derive(Debug, Clone, PartialEq)]
pub struct SkipEvent {
    pub input: PathBuf,
    pub kind: SkipKind,
    pub reason: String,
    /// Frames already sent to the encoder when the file was abandoned
    pub frames_written: u64,
}

impl SkipEvent {
    pub fn new<S: Into<String>>(task: &VideoTask, kind: SkipKind, reason: S, frames_written: u64) -> Self {
        Self {
            input: task.input.clone(),
            kind,
            reason: reason.into(),
            frames_written,
        }
    }
}

/// How a run ended early
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    InvalidConfig(String),
    InvalidFolder(PathBuf),
    /// The folder holds no videos left to dewarp
    NoInput,
    /// None of the videos declares any frames
    NoReadableFrames,
    Cancelled,
    Internal(String),
}

impl AbortReason {
    /// `NoInput` and `NoReadableFrames` are outcomes, not failures
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::NoInput | Self::NoReadableFrames)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(details) => write!(f, "invalid configuration: {}", details),
            Self::InvalidFolder(path) => write!(f, "not a readable folder: {}", path.display()),
            Self::NoInput => f.write_str("no videos to dewarp"),
            Self::NoReadableFrames => f.write_str("no readable frames"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Internal(details) => write!(f, "internal error: {}", details),
        }
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Finished,
    Aborted(AbortReason),
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        match self {
            Self::Finished => true,
            Self::Aborted(reason) => !reason.is_failure(),
        }
    }
}

/// Summary handed to the sink and returned from a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub status: RunStatus,
    pub total_frames: u64,
    pub processed_frames: u64,
    /// Outputs written completely
    pub outputs: Vec<PathBuf>,
    pub skipped: Vec<SkipEvent>,
}

/// Lifecycle of a batch run
///
/// `Idle -> Scanning -> CountingFrames -> Processing -> Finished`, with
/// `Aborted` reachable along the way.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Idle,
    Scanning,
    CountingFrames,
    Processing,
    Finished,
    Aborted(AbortReason),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted(_))
    }

    pub fn can_advance_to(&self, next: &RunState) -> bool {
        use AbortReason::*;
        use RunState::*;

        match (self, next) {
            (Idle, Scanning)
            | (Scanning, CountingFrames)
            | (CountingFrames, Processing)
            | (Processing, Finished) => true,
            (Idle, Aborted(InvalidConfig(_) | InvalidFolder(_))) => true,
            (Scanning, Aborted(InvalidFolder(_) | NoInput)) => true,
            (CountingFrames, Aborted(InvalidConfig(_) | NoReadableFrames)) => true,
            (current, Aborted(Cancelled | Internal(_))) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.can_advance_to(&next) {
            return Err(BatchError::InvalidTransition {
                from: format!("{:?}", self),
                to: format!("{:?}", next),
            }
            .into());
        }

        debug!("Run state {:?} -> {:?}", self, next);
        *self = next;
        Ok(())
    }
}

/// Mutable bookkeeping of one run
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub tasks: Vec<VideoTask>,
    pub total_frames: u64,
    pub processed_frames: u64,
    pub state: RunState,
    pub outputs: Vec<PathBuf>,
    pub skipped: Vec<SkipEvent>,
}

impl Default for BatchRun {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            total_frames: 0,
            processed_frames: 0,
            state: RunState::Idle,
            outputs: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl BatchRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, next: RunState) -> Result<()> {
        self.state.advance(next)
    }

    /// Count one more encoded frame, returning the new total
    pub fn record_frame(&mut self) -> u64 {
        self.processed_frames += 1;
        self.processed_frames
    }

    pub fn report(&self) -> RunReport {
        let status = match &self.state {
            RunState::Finished => RunStatus::Finished,
            RunState::Aborted(reason) => RunStatus::Aborted(reason.clone()),
            other => RunStatus::Aborted(AbortReason::Internal(format!(
                "run stopped in state {:?}",
                other
            ))),
        };

        RunReport {
            status,
            total_frames: self.total_frames,
            processed_frames: self.processed_frames,
            outputs: self.outputs.clone(),
            skipped: self.skipped.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = RunState::Idle;
        state.advance(RunState::Scanning).unwrap();
        state.advance(RunState::CountingFrames).unwrap();
        state.advance(RunState::Processing).unwrap();
        state.advance(RunState::Finished).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut state = RunState::Idle;
        assert!(state.advance(RunState::Processing).is_err());
        assert_eq!(state, RunState::Idle);

        let mut state = RunState::Processing;
        assert!(state
            .advance(RunState::Aborted(AbortReason::InvalidConfig("late".into())))
            .is_err());
        assert!(state.advance(RunState::Aborted(AbortReason::Cancelled)).is_ok());
        assert!(state.advance(RunState::Finished).is_err());
        assert!(state.advance(RunState::Aborted(AbortReason::Cancelled)).is_err());
    }

    #[test]
    fn test_terminal_statuses_per_phase() {
        assert!(RunState::Scanning.can_advance_to(&RunState::Aborted(AbortReason::NoInput)));
        assert!(!RunState::Scanning.can_advance_to(&RunState::Aborted(AbortReason::NoReadableFrames)));
        assert!(RunState::CountingFrames
            .can_advance_to(&RunState::Aborted(AbortReason::NoReadableFrames)));
        assert!(!RunState::Processing.can_advance_to(&RunState::Aborted(AbortReason::NoInput)));
    }

    #[test]
    fn test_report_reflects_state() {
        let mut run = BatchRun::new();
        run.advance(RunState::Scanning).unwrap();
        run.advance(RunState::CountingFrames).unwrap();
        run.total_frames = 3;
        run.advance(RunState::Processing).unwrap();
        assert_eq!(run.record_frame(), 1);
        assert_eq!(run.record_frame(), 2);

        let unfinished = run.report();
        assert!(matches!(unfinished.status, RunStatus::Aborted(AbortReason::Internal(_))));

        run.advance(RunState::Finished).unwrap();
        let report = run.report();
        assert_eq!(report.status, RunStatus::Finished);
        assert_eq!((report.processed_frames, report.total_frames), (2, 3));
        assert!(report.status.is_success());
        assert!(RunStatus::Aborted(AbortReason::NoInput).is_success());
        assert!(!RunStatus::Aborted(AbortReason::Cancelled).is_success());
    }
}
