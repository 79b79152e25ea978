mod action;
mod config;
mod gesture;
mod model_download;
mod pipeline;
mod robot;
mod types;

use std::{
    io::BufRead,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use fast_image_resize as fir;

use action::{ActionResolver, ConfidencePolicy};
use config::Config;
use pipeline::{CapturePipeline, CameraSource, OrtLandmarkSource, StartError, StopOutcome};
use robot::RobotState;
use types::Frame;

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive a robot avatar with hand gestures")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera index, overrides `[camera] index`
    #[arg(long)]
    camera: Option<u32>,

    /// Print the available cameras and exit
    #[arg(long)]
    list_cameras: bool,

    /// Stop after this many seconds instead of waiting for Enter
    #[arg(long)]
    duration: Option<f64>,

    /// Write the last annotated frame to this PNG on exit
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Confidence policy, overrides `[resolver] policy`
    #[arg(long, value_enum)]
    policy: Option<ConfidencePolicy>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list_cameras {
        return list_cameras();
    }

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(index) = cli.camera {
        config.camera.index = index;
    }
    if let Some(policy) = cli.policy {
        config.resolver.policy = policy;
    }
    config.validate()?;

    let mut pipeline = CapturePipeline::new(
        config.pipeline.clone(),
        ActionResolver::new(config.resolver.policy),
    );
    start_capture(&mut pipeline, &config)?;

    let preview = run_update_loop(&pipeline, &config, cli.duration);

    match pipeline.stop() {
        StopOutcome::Detached => log::warn!(
            "capture worker did not stop in time, pipeline {:?}",
            pipeline.state()
        ),
        outcome => log::info!("capture stopped: {outcome:?}"),
    }

    if let Some(path) = &cli.snapshot {
        match preview {
            Some(frame) => {
                save_snapshot(&frame, &config.display, path)?;
                log::info!("snapshot written to {}", path.display());
            }
            None => log::warn!("no frame captured, snapshot skipped"),
        }
    }

    Ok(())
}

#[cfg(feature = "camera-nokhwa")]
fn start_capture(pipeline: &mut CapturePipeline, config: &Config) -> Result<()> {
    // Cheap device check before the models are loaded, and possibly downloaded.
    match pipeline::available_cameras() {
        Ok(devices) => {
            let listed: Vec<u32> = devices.iter().map(|device| device.index).collect();
            require_listed(config.camera.index, &listed)?;
        }
        Err(err) => log::debug!("camera query failed, trying to open anyway: {err:?}"),
    }

    let cameras = pipeline::NokhwaSource {
        index: config.camera.index,
        mirror: config.camera.mirror,
    };
    start_with(pipeline, cameras, config)
}

#[cfg(not(feature = "camera-nokhwa"))]
fn start_capture(_pipeline: &mut CapturePipeline, _config: &Config) -> Result<()> {
    Err(anyhow!("built without camera support; enable the camera-nokhwa feature"))
}

/// Fails when the camera list is known and `index` is not in it.
#[cfg_attr(not(feature = "camera-nokhwa"), allow(dead_code))]
fn require_listed(index: u32, listed: &[u32]) -> Result<()> {
    if listed.contains(&index) {
        return Ok(());
    }
    if listed.is_empty() {
        return Err(anyhow!("camera unavailable: no cameras found"));
    }
    Err(anyhow!(
        "camera unavailable: no camera #{index}, found {listed:?} (see --list-cameras)"
    ))
}

fn start_with<S: CameraSource>(
    pipeline: &mut CapturePipeline,
    cameras: S,
    config: &Config,
) -> Result<()> {
    log::info!("loading landmark models");
    let landmarks =
        OrtLandmarkSource::new(&config.landmarks).context("failed to prepare landmark models")?;

    let device = cameras.describe();
    match pipeline.start(cameras, landmarks) {
        Ok(()) => {
            log::info!("capturing from {device}, press Enter to quit");
            Ok(())
        }
        Err(err @ StartError::CameraUnavailable { .. }) => {
            Err(anyhow!(err).context("camera unavailable"))
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(feature = "camera-nokhwa")]
fn list_cameras() -> Result<()> {
    let devices = pipeline::available_cameras().context("failed to query cameras")?;
    if devices.is_empty() {
        println!("no cameras found");
    }
    for device in devices {
        println!("{}: {}", device.index, device.label);
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn list_cameras() -> Result<()> {
    Err(anyhow!("built without camera support; enable the camera-nokhwa feature"))
}

/// Polls both channels once per tick until the deadline passes or the user
/// presses Enter. Returns the last annotated frame.
fn run_update_loop(
    pipeline: &CapturePipeline,
    config: &Config,
    duration: Option<f64>,
) -> Option<Frame> {
    let quit = Arc::new(AtomicBool::new(false));
    if duration.is_none() {
        let quit = quit.clone();
        let spawned = thread::Builder::new()
            .name("stdin-quit".into())
            .spawn(move || {
                let mut line = String::new();
                let _ = std::io::stdin().lock().read_line(&mut line);
                quit.store(true, Ordering::Relaxed);
            });
        if let Err(err) = spawned {
            log::warn!("failed to watch stdin, running until interrupted: {err}");
        }
    }

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
    let tick = config.display.tick_interval();
    let status_every = Duration::from_millis(config.display.status_interval_ms);

    let mut robot = RobotState::new();
    let mut preview: Option<Frame> = None;
    let mut last_status = Instant::now();

    while !quit.load(Ordering::Relaxed) && deadline.is_none_or(|d| Instant::now() < d) {
        if !pipeline.is_running() {
            log::warn!("capture worker exited unexpectedly");
            break;
        }
        if let Some(decision) = pipeline.latest_decision() {
            let age = decision.timestamp.elapsed();
            if let Some(action) = robot.apply(decision) {
                log::info!(
                    "animation -> {} ({}), frame age {age:?}",
                    action.id(),
                    action.gesture_hint()
                );
            }
        }
        if let Some(annotated) = pipeline.latest_frame() {
            preview = Some(annotated.frame);
        }
        if last_status.elapsed() >= status_every {
            log::info!("{}", robot.status_line());
            last_status = Instant::now();
        }
        thread::sleep(tick);
    }

    preview
}

fn save_snapshot(frame: &Frame, display: &config::DisplayConfig, path: &Path) -> Result<()> {
    let (width, height) = (display.preview_width.max(1), display.preview_height.max(1));
    let src = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst = fir::images::Image::new(width, height, fir::PixelType::U8x4);
    fir::Resizer::new()
        .resize(&src, &mut dst, None)
        .context("failed to resize snapshot")?;

    image::save_buffer(
        path,
        dst.buffer(),
        width,
        height,
        image::ExtendedColorType::Rgba8,
    )
    .with_context(|| format!("failed to write snapshot {}", path.display()))
}
