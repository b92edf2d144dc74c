//! Fiducial-marker tracking pipeline.
//!
//! [`MarkerTracker`] wires a capture device, a marker-detection capability,
//! and a pose solver into one pipeline and exposes a plain-value surface any
//! host can wrap: consumers poll for the latest detections and preview frame
//! at their own cadence, nothing is pushed at them. The module split mirrors
//! the stages:
//! - `config`: pipeline settings and argument parsing.
//! - `processing`: the completion-side normalize → detect → publish handler.
//! - `results`: the single-slot snapshot store.
//! - `preview`: stride-based preview decimation.
//! - `calibration`: camera-parameter file loading.
//! - `telemetry`: tracing/metrics bootstrap for the binary.

use std::path::Path;
use std::sync::Arc;

use frame_ingest::{CaptureDevice, CaptureError, CaptureScheduler, PipelineState, PoolCounts};
use marker_core::{DetectionPipeline, DetectionResult, MarkerDetector, PoseSolver, ResultSnapshot};

pub use calibration::{load_camera_parameters, CalibrationError};
pub use config::TrackerConfig;
pub use preview::{PreviewFrame, PreviewThrottle};
pub use results::ResultStore;

mod calibration;
mod config;
mod preview;
mod processing;
mod results;
pub mod telemetry;

use processing::FrameProcessor;

/// One tracking pipeline over one capture device.
pub struct MarkerTracker {
    scheduler: CaptureScheduler,
    processor: Arc<FrameProcessor>,
    config: TrackerConfig,
}

impl MarkerTracker {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        detector: Arc<dyn MarkerDetector>,
        solver: Arc<dyn PoseSolver>,
        config: TrackerConfig,
    ) -> Self {
        let processor = Arc::new(FrameProcessor::new(
            DetectionPipeline::new(detector, solver),
            config.marker_size,
            PreviewThrottle::new(config.preview_stride, config.preview_width),
        ));
        let scheduler = CaptureScheduler::new(device, processor.clone());
        Self {
            scheduler,
            processor,
            config,
        }
    }

    // Lifecycle ----------------------------------------------------------

    /// Negotiate the stream and allocate buffers. See
    /// [`CaptureScheduler::configure`].
    pub fn configure(&self) -> Result<(), CaptureError> {
        self.scheduler.configure(&self.config.stream_config())
    }

    /// Begin capturing. Detection runs synchronously on the device's
    /// completion thread from here on.
    pub fn start(&self) -> Result<(), CaptureError> {
        self.scheduler.start()
    }

    /// Stop capturing and tear the stream down. Failing no-op when not
    /// running.
    pub fn stop(&self) -> Result<(), CaptureError> {
        self.scheduler.stop()
    }

    pub fn state(&self) -> PipelineState {
        self.scheduler.state()
    }

    /// Buffer-pool census, for diagnostics and tests.
    pub fn pool_counts(&self) -> Option<PoolCounts> {
        self.scheduler.pool_counts()
    }

    // Calibration --------------------------------------------------------

    /// Load intrinsics from a calibration file. On failure the pipeline
    /// keeps running in degraded mode and the previous calibration (if any)
    /// is retained.
    pub fn load_camera_parameters(&self, path: &Path) -> Result<(), CalibrationError> {
        let intrinsics = calibration::load_camera_parameters(path)?;
        self.processor
            .intrinsics
            .lock()
            .expect("intrinsics lock")
            .set_calibrated(intrinsics);
        Ok(())
    }

    /// Stage the 3×3 projection matrix (row-major). Pose estimation starts
    /// once both the matrix and the distortion coefficients are present and
    /// well-formed.
    pub fn set_camera_matrix(&self, matrix: [f64; 9]) {
        self.processor
            .intrinsics
            .lock()
            .expect("intrinsics lock")
            .set_matrix(matrix);
    }

    /// Stage the k1, k2, p1, p2 distortion coefficients.
    pub fn set_distortion_coefficients(&self, coefficients: [f64; 4]) {
        self.processor
            .intrinsics
            .lock()
            .expect("intrinsics lock")
            .set_distortion(coefficients);
    }

    pub fn camera_matrix(&self) -> Option<[f64; 9]> {
        self.processor
            .intrinsics
            .lock()
            .expect("intrinsics lock")
            .matrix()
    }

    pub fn distortion_coefficients(&self) -> Option<[f64; 4]> {
        self.processor
            .intrinsics
            .lock()
            .expect("intrinsics lock")
            .distortion()
    }

    pub fn set_marker_size(&self, meters: f64) {
        *self.processor.marker_size.lock().expect("marker size lock") = meters;
    }

    pub fn marker_size(&self) -> f64 {
        *self.processor.marker_size.lock().expect("marker size lock")
    }

    // Results ------------------------------------------------------------

    /// Results of the newest completed detection pass; empty until the
    /// first pass has been published.
    pub fn latest_detections(&self) -> Vec<DetectionResult> {
        self.processor
            .results
            .latest()
            .map(|snapshot| snapshot.results)
            .unwrap_or_default()
    }

    /// The newest snapshot with its sequence and timestamp.
    pub fn latest_snapshot(&self) -> Option<ResultSnapshot> {
        self.processor.results.latest()
    }

    /// Completions handled so far, including dropped frames.
    pub fn frames_handled(&self) -> u64 {
        self.processor.frames_handled()
    }

    // Preview ------------------------------------------------------------

    pub fn set_video_feedback_enabled(&self, enabled: bool) {
        self.processor.preview.set_enabled(enabled);
    }

    pub fn video_feedback_enabled(&self) -> bool {
        self.processor.preview.enabled()
    }

    /// The most recent preview frame, if feedback is enabled and one has
    /// been admitted.
    pub fn current_frame_texture(&self) -> Option<PreviewFrame> {
        self.processor.preview.preview()
    }
}
