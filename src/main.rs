use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fisheye_dewarp::{
    batch::{BatchProcessor, CancelToken, ChannelSink, ProgressEvent, RunReport},
    config::Config,
    error::{BatchError, DewarpError},
    projection::{CropMargins, DewarpConfig, Layout, Projection, ProjectionMap},
    video::{Frame, FrameTransformer},
};

#[derive(Parser)]
#[command(
    name = "fisheye-dewarp",
    version,
    about = "Convert fisheye videos into rectilinear ones",
    long_about = "fisheye-dewarp re-projects every video in a folder through a fisheye lens model and writes the result next to the source with a `_dewarped` suffix."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Dewarp every video in a folder
    Run {
        /// Folder with the videos (defaults to the one stored in the configuration)
        folder: Option<PathBuf>,

        /// Configuration file (optional)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        lens: LensArgs,

        /// Write the effective configuration to this file before starting
        #[arg(long)]
        save_config: Option<PathBuf>,
    },

    /// Dewarp a single image to try out lens parameters
    Preview {
        /// Input image (PNG or JPEG)
        #[arg(short, long)]
        input: PathBuf,

        /// Output PNG
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration file (optional)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        lens: LensArgs,
    },

    /// Write the default configuration to a file
    InitConfig {
        path: PathBuf,
    },
}

/// Lens overrides, applied on top of the configuration file
#[derive(Args, Debug, Default)]
struct LensArgs {
    /// Lens projection model
    #[arg(long, value_enum)]
    projection: Option<Projection>,

    /// Circular or full-frame fisheye
    #[arg(long, value_enum)]
    layout: Option<Layout>,

    /// Field of view of the lens (degrees)
    #[arg(long)]
    source_fov: Option<f64>,

    /// Field of view of the output (degrees, below 180)
    #[arg(long)]
    target_fov: Option<f64>,

    /// In-plane rotation (radians)
    #[arg(long, allow_negative_numbers = true)]
    rotation: Option<f64>,

    #[arg(long)]
    crop_left: Option<u32>,

    #[arg(long)]
    crop_right: Option<u32>,

    #[arg(long)]
    crop_top: Option<u32>,

    #[arg(long)]
    crop_bottom: Option<u32>,
}

impl LensArgs {
    fn apply(&self, config: &mut DewarpConfig) {
        if let Some(projection) = self.projection {
            config.projection = projection;
        }
        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if let Some(fov) = self.source_fov {
            config.source_fov = fov;
        }
        if let Some(fov) = self.target_fov {
            config.target_fov = fov;
        }
        if let Some(rotation) = self.rotation {
            config.rotation = rotation;
        }

        let crop = config.crop;
        config.crop = CropMargins::new(
            self.crop_left.unwrap_or(crop.left),
            self.crop_right.unwrap_or(crop.right),
            self.crop_top.unwrap_or(crop.top),
            self.crop_bottom.unwrap_or(crop.bottom),
        );
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Starting fisheye-dewarp v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            folder,
            config,
            lens,
            save_config,
        } => run_folder(folder, config.as_deref(), &lens, save_config.as_deref()).await,
        Commands::Preview {
            input,
            output,
            config,
            lens,
        } => {
            preview(&input, &output, config.as_deref(), &lens)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::InitConfig { path } => {
            Config::default().save_to_file(&path)?;
            info!("Default configuration written to {:?}", path);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>, lens: &LensArgs) -> Result<Config> {
    let mut config = match path {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };

    lens.apply(&mut config.dewarp);
    Ok(config)
}

async fn run_folder(
    folder: Option<PathBuf>,
    config_path: Option<&Path>,
    lens: &LensArgs,
    save_config: Option<&Path>,
) -> Result<ExitCode> {
    let mut config = load_config(config_path, lens)?;
    let folder = folder
        .or_else(|| config.folder.clone())
        .ok_or_else(|| anyhow!("No folder given and none stored in the configuration"))?;
    config.folder = Some(folder.clone());
    config.validate().map_err(|e| anyhow!(e.user_message()))?;

    if let Some(path) = save_config {
        config.save_to_file(path)?;
        info!("Configuration saved to {:?}", path);
    }

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.processing.threads)
        .build_global()
        .context("Failed to configure the worker thread pool")?;

    let backend = config.video.backend();
    backend.check_available().map_err(|e| anyhow!(e.user_message()))?;

    let processor =
        BatchProcessor::new(Arc::new(backend)).with_extensions(config.video.extensions.clone());
    let cancel = CancelToken::new();
    let (mut sink, events) = ChannelSink::channel();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        let mut received = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            received += 1;
            match interrupt_action(received) {
                Interrupt::Cancel => {
                    warn!("Interrupted, stopping after the current frame (Ctrl-C again to quit)");
                    interrupt.cancel();
                }
                Interrupt::Exit => {
                    warn!("Interrupted again, exiting now");
                    std::process::exit(130);
                }
            }
        }
    });

    let dewarp = config.dewarp;
    let worker = tokio::task::spawn_blocking(move || {
        processor.run(&folder, dewarp, &mut sink, &cancel)
    });

    TerminalProgress::new().drive(events).await;

    let report = worker.await.map_err(|e| {
        DewarpError::from(BatchError::WorkerFailed {
            reason: e.to_string(),
        })
    })??;

    print_summary(&report);
    Ok(if report.status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Response to the n-th Ctrl-C of a run
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    Exit,
}

/// The first Ctrl-C cancels cleanly; any further one quits even if the worker
/// is stuck waiting on ffmpeg
fn interrupt_action(received: usize) -> Interrupt {
    if received <= 1 {
        Interrupt::Cancel
    } else {
        Interrupt::Exit
    }
}

fn preview(input: &Path, output: &Path, config_path: Option<&Path>, lens: &LensArgs) -> Result<()> {
    let config = load_config(config_path, lens)?;

    let image = image::open(input)
        .with_context(|| format!("Failed to open image {:?}", input))?
        .to_rgb8();
    let frame = Frame::new(image);

    let map = ProjectionMap::build(config.dewarp, frame.width(), frame.height())
        .map_err(|e| anyhow!(e.user_message()))?;
    info!(
        "Map covers {} of {} pixels",
        map.coverage(),
        frame.width() as u64 * frame.height() as u64
    );

    let dewarped = FrameTransformer::new(Arc::new(map)).apply(&frame)?;
    dewarped
        .save_png(output)
        .with_context(|| format!("Failed to write {:?}", output))?;

    info!("Preview saved to {:?}", output);
    Ok(())
}

fn print_summary(report: &RunReport) {
    for skipped in &report.skipped {
        warn!(
            "Skipped {} ({}): {}",
            skipped.input.display(),
            skipped.kind,
            skipped.reason
        );
    }
    info!(
        "{} video(s) written, {} skipped, {}/{} frames",
        report.outputs.len(),
        report.skipped.len(),
        report.processed_frames,
        report.total_frames
    );
}

/// Draws the worker's progress events as a terminal progress bar
struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} frames [{elapsed_precise}<{eta_precise}, {msg}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        Self { bar }
    }

    /// Consume events until the worker drops its sender
    async fn drive(self, mut events: UnboundedReceiver<ProgressEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ProgressEvent::Progress { done, total } => {
                    self.bar.set_length(total.max(done));
                    self.bar.set_position(done);
                }
                ProgressEvent::TaskStarted { index, count, input } => {
                    let name = input
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    self.bar.set_message(format!("{}/{} {}", index + 1, count, name));
                }
                ProgressEvent::Skipped(event) => {
                    self.bar.println(format!(
                        "Skipped {}: {}",
                        event.input.display(),
                        event.kind
                    ));
                }
                ProgressEvent::Finished(_) => self.bar.finish_with_message("finished"),
                ProgressEvent::Aborted(reason) => self.bar.abandon_with_message(reason.to_string()),
            }
        }
    }
}
