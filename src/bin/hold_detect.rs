//! hold_detect - capture a wall photo, detect holds, and render the overlay
//!
//! Sources:
//! - `--image PATH` uploads an existing photo
//! - otherwise the configured camera is opened and snapshotted; when no camera
//!   is usable, a file path is read from stdin instead

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;

use climblog_capture::capture::StillImage;
use climblog_capture::config::CaptureConfig;
use climblog_capture::detect::{AnnotatedImage, DetectionClient, RenderMode};
use climblog_capture::overlay::{ImageLayout, RasterSurface, RenderOutcome};
use climblog_capture::session::{CaptureOutcome, CaptureSession};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "hold_detect",
    about = "Detect climbing holds in a photo and draw labeled boxes"
)]
struct Args {
    /// Photo to analyze instead of using the camera
    #[arg(long, value_name = "PATH", conflicts_with = "camera")]
    image: Option<PathBuf>,

    /// Camera device (e.g. /dev/video0 or stub://rear)
    #[arg(long, value_name = "DEVICE")]
    camera: Option<String>,

    /// Detection service base URL
    #[arg(long, value_name = "URL", env = "CLIMBLOG_DETECT_BASE")]
    detect_base: Option<String>,

    /// Confidence threshold (0.10-0.90, snapped to 0.05)
    #[arg(long)]
    confidence: Option<f32>,

    /// Overlap (NMS) threshold sent to the service
    #[arg(long)]
    overlap: Option<f32>,

    /// What the service should return
    #[arg(long, value_enum)]
    mode: Option<RenderMode>,

    /// Width available for display; the photo is scaled down to fit
    #[arg(long)]
    display_width: Option<f32>,

    /// Height available for display
    #[arg(long)]
    display_height: Option<f32>,

    /// Write the overlay as a transparent PNG
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Write the server-rendered image when one is returned
    #[arg(long, value_name = "PATH")]
    annotated_out: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::new(args.ui, is_tty, !stdout_is_tty);

    let mut cfg = {
        let _stage = ui.stage("Load configuration");
        CaptureConfig::load()?
    };
    if let Some(device) = &args.camera {
        cfg.camera.device = device.clone();
    }
    if let Some(base) = &args.detect_base {
        cfg.detector.base_url = base.clone();
    }
    if let Some(overlap) = args.overlap {
        if !(0.0..=1.0).contains(&overlap) {
            return Err(anyhow!("--overlap must be between 0 and 1"));
        }
        cfg.detector.overlap = overlap;
    }
    if let Some(mode) = args.mode {
        cfg.detector.mode = mode;
    }

    let client = DetectionClient::new(cfg.detector.clone())?;
    let mut session = CaptureSession::new(client, cfg.session_config());
    if let Some(confidence) = args.confidence {
        session.set_threshold(confidence);
    }

    let outcome = {
        let _stage = ui.stage("Capture and detect");
        match &args.image {
            Some(path) => session.upload(path),
            None => capture_from_camera(&mut session),
        }
    };
    match outcome {
        CaptureOutcome::Submitted => {}
        CaptureOutcome::PickerCancelled => return Err(anyhow!("no image selected")),
        other => {
            let reason = session.error_message().unwrap_or("capture did not complete");
            return Err(anyhow!("{} ({:?})", reason, other));
        }
    }
    if let Some(message) = session.error_message() {
        return Err(anyhow!("detection failed: {}", message));
    }

    let still = session
        .still()
        .cloned()
        .ok_or_else(|| anyhow!("no still image after capture"))?;
    report(&session, &still, args.json)?;

    if let Some(path) = &args.annotated_out {
        match session.annotated() {
            Some(value) => {
                let _stage = ui.stage("Fetch annotated image");
                let annotated = AnnotatedImage::parse(value)?;
                let bytes = session.service().fetch_annotated(&annotated)?;
                std::fs::write(path, bytes)
                    .with_context(|| format!("write annotated image {}", path.display()))?;
                println!("annotated image: {}", path.display());
            }
            None => log::warn!("service returned no annotated image"),
        }
    }

    if let Some(path) = &args.out {
        let _stage = ui.stage("Render overlay");
        let (natural_w, natural_h) = still.dimensions();
        let layout = match (args.display_width, args.display_height) {
            (None, None) => ImageLayout::natural(natural_w, natural_h),
            (w, h) => ImageLayout::fit_within(
                natural_w,
                natural_h,
                w.unwrap_or(f32::MAX),
                h.unwrap_or(f32::MAX),
            ),
        };
        let mut surface = RasterSurface::default();
        match session.redraw(&mut surface, &layout) {
            RenderOutcome::Drawn(count) => log::info!("overlay: {} boxes", count),
            RenderOutcome::Suppressed => {
                log::info!("overlay: left empty, server-rendered image returned")
            }
            RenderOutcome::Empty => log::info!("overlay: no predictions above threshold"),
            RenderOutcome::NotLaidOut => return Err(anyhow!("display size is zero")),
        }
        surface.save_png(path)?;
        println!("overlay: {}", path.display());
    }
    Ok(())
}

/// Open the camera, then snapshot it. Falls back to a path read from stdin.
fn capture_from_camera(session: &mut CaptureSession<DetectionClient>) -> CaptureOutcome {
    let mut picker = || -> Option<PathBuf> {
        eprintln!("camera unavailable; enter an image path:");
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok()?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    };
    let first = session.press_capture(&mut picker);
    if first != CaptureOutcome::PreviewStarted {
        return first;
    }
    session.press_capture(&mut picker)
}

fn report(session: &CaptureSession<DetectionClient>, still: &StillImage, json: bool) -> Result<()> {
    let (width, height) = still.dimensions();
    if json {
        let doc = serde_json::json!({
            "image": {
                "width": width,
                "height": height,
                "sha256": still.digest(),
            },
            "threshold": session.threshold().value(),
            "predictions": session.active_predictions(),
            "summary": session.summary(),
            "annotated": session.annotated().is_some(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }
    println!(
        "image {}x{} (sha256 {}), threshold {}",
        width,
        height,
        still.digest(),
        session.threshold().percent_label()
    );
    let summary = session.summary();
    println!(
        "{} of {} detections at or above threshold",
        summary.total,
        session.predictions().len()
    );
    for (class, count) in &summary.by_class {
        println!("  {:<16} {}", class, count);
    }
    Ok(())
}
