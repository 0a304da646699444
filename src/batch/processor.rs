use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::batch::cancel::CancelToken;
use crate::batch::progress::ProgressSink;
use crate::batch::run::{AbortReason, BatchRun, RunReport, RunState, RunStatus, SkipEvent, SkipKind};
use crate::error::{DewarpError, ProjectionError, Result};
use crate::projection::{DewarpConfig, MapCache};
use crate::video::backend::{EncoderSettings, FrameDecoder, FrameEncoder, VideoBackend};
use crate::video::scan::scan_folder;
use crate::video::transform::FrameTransformer;
use crate::video::types::VideoTask;

/// Dewarps every video in a folder, one after another
///
/// The run goes through these phases:
/// 1. Validation - lens parameters and folder
/// 2. Scanning - collect videos that are not outputs themselves
/// 3. Counting frames - probe each video and check the crop against its size
/// 4. Processing - decode, transform and encode each video in order
pub struct BatchProcessor {
    backend: Arc<dyn VideoBackend>,
    extensions: Vec<String>,
}

enum TaskOutcome {
    Written,
    Skipped(SkipEvent),
    Cancelled,
}

enum Pump {
    Exhausted,
    Cancelled,
    DecodeFailed(String),
    EncodeFailed(String),
}

impl BatchProcessor {
    pub fn new(backend: Arc<dyn VideoBackend>) -> Self {
        Self {
            backend,
            extensions: vec!["mp4".to_string()],
        }
    }

    /// File extensions the folder scan accepts
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Dewarp every pending video in `folder`.
    ///
    /// The sink receives exactly one terminal call. Configuration and folder
    /// problems come back as an aborted [`RunReport`]. Errors that are not
    /// [recoverable](crate::error::DewarpError::is_recoverable), such as a frame
    /// that does not match its map or a backend that cannot start, are
    /// returned as `Err`.
    pub fn run(
        &self,
        folder: &Path,
        config: DewarpConfig,
        sink: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let mut run = BatchRun::new();
        let mut cache = MapCache::new();

        info!("🎬 Dewarping videos in {} ({} backend)", folder.display(), self.backend.name());
        info!(
            "   {} / {}, source {}°, target {}°, rotation {:.2} rad",
            config.projection, config.layout, config.source_fov, config.target_fov, config.rotation
        );

        if let Err(e) = self.execute(&mut run, &mut cache, folder, config, sink, cancel) {
            let reason = AbortReason::Internal(e.to_string());
            error!("Run failed: {}", e);
            sink.on_aborted(&reason);
            return Err(e);
        }

        let report = run.report();
        match &report.status {
            RunStatus::Finished => sink.on_finished(&report),
            RunStatus::Aborted(reason) => sink.on_aborted(reason),
        }

        debug!("Map cache: {} built, {} reused", cache.builds(), cache.hits());
        Ok(report)
    }

    /// Drive `run` to a terminal state; the caller makes the terminal sink call
    fn execute(
        &self,
        run: &mut BatchRun,
        cache: &mut MapCache,
        folder: &Path,
        config: DewarpConfig,
        sink: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        // Step 1: Validation
        if let Err(e) = config.validate() {
            return run.advance(RunState::Aborted(AbortReason::InvalidConfig(e.to_string())));
        }
        if !folder.is_dir() {
            return run.advance(RunState::Aborted(AbortReason::InvalidFolder(folder.to_path_buf())));
        }

        // Step 2: Scanning
        run.advance(RunState::Scanning)?;
        info!("🔍 Scanning for videos...");
        run.tasks = match scan_folder(folder, &self.extensions) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("Could not scan {}: {}", folder.display(), e);
                return run.advance(RunState::Aborted(AbortReason::InvalidFolder(folder.to_path_buf())));
            }
        };
        if run.tasks.is_empty() {
            return run.advance(RunState::Aborted(AbortReason::NoInput));
        }
        info!("   Found {} video(s)", run.tasks.len());

        // Step 3: Counting frames
        run.advance(RunState::CountingFrames)?;
        info!("📏 Calculating total frames...");
        match self.probe_tasks(&mut run.tasks, &config) {
            Ok(()) => {}
            Err(DewarpError::Projection(ProjectionError::InvalidConfig { details })) => {
                return run.advance(RunState::Aborted(AbortReason::InvalidConfig(details)));
            }
            Err(e) => return Err(e),
        }
        run.total_frames = run.tasks.iter().map(|task| task.frame_count).sum();
        if run.total_frames == 0 {
            return run.advance(RunState::Aborted(AbortReason::NoReadableFrames));
        }
        info!("   {} frames in total", run.total_frames);

        // Step 4: Processing
        run.advance(RunState::Processing)?;
        info!("🎞️ Processing...");
        let tasks = run.tasks.clone();
        for (index, task) in tasks.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Cancellation requested before {}", task.name());
                return run.advance(RunState::Aborted(AbortReason::Cancelled));
            }

            sink.on_task_started(index, tasks.len(), task);
            match self.process_task(task, config, cache, run, sink, cancel)? {
                TaskOutcome::Written => {
                    info!("   ✅ {}", task.output.display());
                    run.outputs.push(task.output.clone());
                }
                TaskOutcome::Skipped(event) => {
                    warn!(
                        "Skipping {} ({}, {} frames written): {}",
                        task.name(),
                        event.kind,
                        event.frames_written,
                        event.reason
                    );
                    sink.on_skipped(&event);
                    run.skipped.push(event);
                }
                TaskOutcome::Cancelled => {
                    info!("Cancelled while processing {}", task.name());
                    return run.advance(RunState::Aborted(AbortReason::Cancelled));
                }
            }
        }

        run.advance(RunState::Finished)?;
        info!("🎉 Finished");
        Ok(())
    }

    /// Fill in metadata and frame counts. Fails on the first video the crop
    /// does not fit.
    fn probe_tasks(&self, tasks: &mut [VideoTask], config: &DewarpConfig) -> Result<()> {
        for task in tasks.iter_mut() {
            match self.backend.probe(&task.input) {
                Ok(metadata) => {
                    config
                        .validate_for(metadata.width, metadata.height)
                        .map_err(|e| match e {
                            DewarpError::Projection(ProjectionError::InvalidConfig { details }) => {
                                ProjectionError::InvalidConfig {
                                    details: format!("{}: {}", task.name(), details),
                                }
                                .into()
                            }
                            other => other,
                        })?;
                    debug!(
                        "{}: {}x{}, {} frames",
                        task.name(),
                        metadata.width,
                        metadata.height,
                        metadata.frame_count
                    );
                    task.frame_count = metadata.frame_count;
                    task.metadata = Some(metadata);
                }
                Err(e) => debug!("Could not probe {}, counting 0 frames: {}", task.name(), e),
            }
        }
        Ok(())
    }

    fn process_task(
        &self,
        task: &VideoTask,
        config: DewarpConfig,
        cache: &mut MapCache,
        run: &mut BatchRun,
        sink: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<TaskOutcome> {
        if let Err(e) = remove_if_exists(&task.output) {
            let reason = format!("could not remove stale output: {}", e);
            return Ok(TaskOutcome::Skipped(SkipEvent::new(task, SkipKind::EncoderFailed, reason, 0)));
        }

        let mut decoder = match self.backend.open_decoder(&task.input, task.metadata.as_ref()) {
            Ok(decoder) => decoder,
            Err(e) if !e.is_recoverable() => return Err(e),
            Err(e) => {
                return Ok(TaskOutcome::Skipped(SkipEvent::new(
                    task,
                    SkipKind::UnreadableVideo,
                    e.to_string(),
                    0,
                )))
            }
        };

        let metadata = decoder.metadata().clone();
        let settings = EncoderSettings::from_metadata(&metadata);
        let mut encoder = match self.backend.open_encoder(&task.output, &settings) {
            Ok(encoder) => encoder,
            Err(e) => {
                let _ = decoder.close();
                let _ = remove_if_exists(&task.output);
                if !e.is_recoverable() {
                    return Err(e);
                }
                return Ok(TaskOutcome::Skipped(SkipEvent::new(
                    task,
                    SkipKind::EncoderFailed,
                    e.to_string(),
                    0,
                )));
            }
        };

        let map = match cache.get_or_build(config, metadata.width, metadata.height) {
            Ok(map) => map,
            Err(e) => {
                discard(decoder, encoder, &task.output);
                return Err(e);
            }
        };
        let transformer = FrameTransformer::new(map);

        let mut frames_written = 0;
        let pumped = pump_frames(
            decoder.as_mut(),
            encoder.as_mut(),
            &transformer,
            &mut frames_written,
            run,
            sink,
            cancel,
        );

        match pumped {
            Ok(Pump::Exhausted) => {
                if let Err(e) = decoder.close() {
                    debug!("Closing decoder for {}: {}", task.name(), e);
                }
                self.finalize(task, encoder, frames_written, None)
            }
            Ok(Pump::DecodeFailed(reason)) => {
                let _ = decoder.close();
                self.finalize(task, encoder, frames_written, Some(reason))
            }
            Ok(Pump::EncodeFailed(reason)) => {
                discard(decoder, encoder, &task.output);
                Ok(TaskOutcome::Skipped(SkipEvent::new(
                    task,
                    SkipKind::EncodeFailed,
                    reason,
                    frames_written,
                )))
            }
            Ok(Pump::Cancelled) => {
                discard(decoder, encoder, &task.output);
                Ok(TaskOutcome::Cancelled)
            }
            Err(e) => {
                discard(decoder, encoder, &task.output);
                Err(e)
            }
        }
    }

    /// Finish the encoder. A decode failure keeps the frames written so far
    /// but still reports the file as skipped.
    fn finalize(
        &self,
        task: &VideoTask,
        encoder: Box<dyn FrameEncoder>,
        frames_written: u64,
        decode_failure: Option<String>,
    ) -> Result<TaskOutcome> {
        if let Err(e) = encoder.finish() {
            let _ = remove_if_exists(&task.output);
            if !e.is_recoverable() {
                return Err(e);
            }
            return Ok(TaskOutcome::Skipped(SkipEvent::new(
                task,
                SkipKind::EncodeFailed,
                e.to_string(),
                frames_written,
            )));
        }

        match decode_failure {
            None => Ok(TaskOutcome::Written),
            Some(reason) => Ok(TaskOutcome::Skipped(SkipEvent::new(
                task,
                SkipKind::DecodeFailed,
                reason,
                frames_written,
            ))),
        }
    }
}

/// Move frames from decoder to encoder until the stream ends, fails or the
/// run is cancelled
fn pump_frames(
    decoder: &mut dyn FrameDecoder,
    encoder: &mut dyn FrameEncoder,
    transformer: &FrameTransformer,
    frames_written: &mut u64,
    run: &mut BatchRun,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<Pump> {
    loop {
        if cancel.is_cancelled() {
            return Ok(Pump::Cancelled);
        }

        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Pump::Exhausted),
            Err(e) if e.is_recoverable() => return Ok(Pump::DecodeFailed(e.to_string())),
            Err(e) => return Err(e),
        };

        let dewarped = transformer.apply(&frame)?;
        match encoder.write_frame(&dewarped) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => return Ok(Pump::EncodeFailed(e.to_string())),
            Err(e) => return Err(e),
        }

        *frames_written += 1;
        let done = run.record_frame();
        sink.on_progress(done, run.total_frames);
    }
}

/// Close both ends and delete the partial output
fn discard(decoder: Box<dyn FrameDecoder>, encoder: Box<dyn FrameEncoder>, output: &Path) {
    let _ = decoder.close();
    let _ = encoder.finish();
    match remove_if_exists(output) {
        Ok(true) => debug!("Removed partial output {}", output.display()),
        Ok(false) => {}
        Err(e) => warn!("Could not remove partial output {}: {}", output.display(), e),
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
