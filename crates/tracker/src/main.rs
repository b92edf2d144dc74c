//! Demo binary: runs the tracking pipeline against the synthetic camera and
//! prints the latest detections at a polling cadence, the same pull model a
//! host binding would use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use frame_ingest::{FramePainter, SyntheticCamera};
use marker_core::synthetic::{DarkQuadDetector, SyntheticScene};
use marker_core::{CameraIntrinsics, PlanarPoseSolver};
use tracing::{info, warn};
use tracker::{telemetry, MarkerTracker, TrackerConfig};

const DEMO_MARKER_ID: i32 = 23;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    telemetry::init_tracing();
    let metrics_handle = telemetry::init_metrics_recorder();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = TrackerConfig::from_args(&args)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_shutdown.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    // The demo observes a synthetic marker bobbing along the optical axis,
    // seen through a nominal pinhole model for the configured stream size.
    let intrinsics = demo_intrinsics(&config);
    let painter = scene_painter(&config, intrinsics.clone());
    let device = SyntheticCamera::new(painter).with_frame_interval(Duration::from_millis(33));

    let tracker = MarkerTracker::new(
        Box::new(device),
        Arc::new(DarkQuadDetector::new(DEMO_MARKER_ID)),
        Arc::new(PlanarPoseSolver),
        config.clone(),
    );

    match &config.calibration_path {
        Some(path) => tracker
            .load_camera_parameters(path)
            .with_context(|| format!("Failed to load calibration from {}", path.display()))?,
        None => {
            tracker.set_camera_matrix(intrinsics.matrix_row_major());
            tracker.set_distortion_coefficients(intrinsics.distortion_array());
        }
    }
    tracker.set_video_feedback_enabled(true);

    tracker.configure().context("Failed to configure capture")?;
    tracker.start().context("Failed to start capture")?;
    info!(
        width = config.width,
        height = config.height,
        marker_size = config.marker_size,
        "tracking started, press Ctrl+C to stop"
    );

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_secs(1));

        let detections = tracker.latest_detections();
        if detections.is_empty() {
            info!(frames = tracker.frames_handled(), "no markers in view");
            continue;
        }
        for detection in &detections {
            info!(
                id = detection.id,
                tvec = format!(
                    "[{:.3}, {:.3}, {:.3}]",
                    detection.translation.x, detection.translation.y, detection.translation.z
                ),
                rvec = format!(
                    "[{:.3}, {:.3}, {:.3}]",
                    detection.rotation.x, detection.rotation.y, detection.rotation.z
                ),
                "marker"
            );
        }
        if let Some(preview) = tracker.current_frame_texture() {
            info!(
                generation = preview.generation,
                width = preview.image.width(),
                height = preview.image.height(),
                "preview frame available"
            );
        }
    }

    if let Err(err) = tracker.stop() {
        warn!(%err, "stop after shutdown request failed");
    }
    info!("tracking stopped");
    tracing::debug!(metrics = %metrics_handle.render(), "final metric values");
    Ok(())
}

fn demo_intrinsics(config: &TrackerConfig) -> CameraIntrinsics {
    let matrix = [
        600.0,
        0.0,
        config.width as f64 / 2.0,
        0.0,
        600.0,
        config.height as f64 / 2.0,
        0.0,
        0.0,
        1.0,
    ];
    CameraIntrinsics::from_parts(matrix, [0.0; 4]).expect("demo intrinsics are well-formed")
}

fn scene_painter(config: &TrackerConfig, intrinsics: CameraIntrinsics) -> FramePainter {
    let (width, height) = (config.width, config.height);
    let marker_size = config.marker_size;
    Box::new(move |sequence| {
        let phase = (sequence % 120) as f64 / 120.0 * std::f64::consts::TAU;
        let scene = SyntheticScene {
            intrinsics: intrinsics.clone(),
            marker_id: DEMO_MARKER_ID,
            marker_size,
            distance: 0.5 + 0.1 * phase.sin(),
        };
        scene.render(width, height).into_raw()
    })
}
