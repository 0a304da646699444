use std::path::PathBuf;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::batch::run::{AbortReason, RunReport, SkipEvent};
use crate::video::types::VideoTask;

/// Receives status updates from a batch run
///
/// A run makes exactly one terminal call, either `on_finished` or
/// `on_aborted`, and `done` never decreases between `on_progress` calls.
pub trait ProgressSink: Send {
    fn on_progress(&mut self, done: u64, total: u64);

    fn on_task_started(&mut self, _index: usize, _count: usize, _task: &VideoTask) {}

    fn on_skipped(&mut self, event: &SkipEvent);

    fn on_finished(&mut self, report: &RunReport);

    fn on_aborted(&mut self, reason: &AbortReason);
}

/// Owned form of every sink callback
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress { done: u64, total: u64 },
    TaskStarted { index: usize, count: usize, input: PathBuf },
    Skipped(SkipEvent),
    Finished(RunReport),
    Aborted(AbortReason),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Aborted(_))
    }
}

/// Forwards events over an unbounded channel to another thread or task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ProgressEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&mut self, done: u64, total: u64) {
        self.send(ProgressEvent::Progress { done, total });
    }

    fn on_task_started(&mut self, index: usize, count: usize, task: &VideoTask) {
        self.send(ProgressEvent::TaskStarted {
            index,
            count,
            input: task.input.clone(),
        });
    }

    fn on_skipped(&mut self, event: &SkipEvent) {
        self.send(ProgressEvent::Skipped(event.clone()));
    }

    fn on_finished(&mut self, report: &RunReport) {
        self.send(ProgressEvent::Finished(report.clone()));
    }

    fn on_aborted(&mut self, reason: &AbortReason) {
        self.send(ProgressEvent::Aborted(reason.clone()));
    }
}

/// Reports through `tracing`, logging progress in 10% steps
#[derive(Debug, Default)]
pub struct LogSink {
    last_decile: Option<u64>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogSink {
    fn on_progress(&mut self, done: u64, total: u64) {
        if total == 0 {
            return;
        }

        let decile = (done.min(total) * 10) / total;
        if self.last_decile != Some(decile) {
            self.last_decile = Some(decile);
            info!("Processing... {}% ({}/{} frames)", decile * 10, done, total);
        }
    }

    fn on_task_started(&mut self, index: usize, count: usize, task: &VideoTask) {
        info!("[{}/{}] {}", index + 1, count, task.name());
    }

    fn on_skipped(&mut self, event: &SkipEvent) {
        warn!(
            "Skipped {} ({}): {}",
            event.input.display(),
            event.kind,
            event.reason
        );
    }

    fn on_finished(&mut self, report: &RunReport) {
        info!(
            "Finished: {} videos written, {} skipped, {}/{} frames",
            report.outputs.len(),
            report.skipped.len(),
            report.processed_frames,
            report.total_frames
        );
    }

    fn on_aborted(&mut self, reason: &AbortReason) {
        if reason.is_failure() {
            warn!("Aborted: {}", reason);
        } else {
            info!("Nothing to do: {}", reason);
        }
    }
}
