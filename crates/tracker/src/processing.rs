//! Completion-side frame processing.
//!
//! One [`FrameProcessor`] is registered as the capture scheduler's frame
//! sink. Everything it does (normalize, detect, publish, preview) runs
//! synchronously on the device's callback thread; per-frame failures are
//! absorbed here and never reach the consumer surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use frame_ingest::{FrameSink, RawFrame};
use marker_core::{normalize, CameraIntrinsics, DetectionPipeline};
use tracing::debug;

use crate::preview::PreviewThrottle;
use crate::results::ResultStore;

const HEARTBEAT_EVERY: u64 = 30;

/// Staged intrinsics. The camera matrix and distortion vector arrive
/// independently through the consumer surface; only once both are present
/// and well-formed does the pipeline leave degraded mode.
#[derive(Default)]
pub(crate) struct IntrinsicsSlot {
    matrix: Option<[f64; 9]>,
    distortion: Option<[f64; 4]>,
    current: Option<CameraIntrinsics>,
}

impl IntrinsicsSlot {
    pub(crate) fn set_matrix(&mut self, matrix: [f64; 9]) {
        self.matrix = Some(matrix);
        self.rebuild();
    }

    pub(crate) fn set_distortion(&mut self, distortion: [f64; 4]) {
        self.distortion = Some(distortion);
        self.rebuild();
    }

    pub(crate) fn set_calibrated(&mut self, intrinsics: CameraIntrinsics) {
        self.matrix = Some(intrinsics.matrix_row_major());
        self.distortion = Some(intrinsics.distortion_array());
        self.current = Some(intrinsics);
    }

    pub(crate) fn matrix(&self) -> Option<[f64; 9]> {
        self.matrix
    }

    pub(crate) fn distortion(&self) -> Option<[f64; 4]> {
        self.distortion
    }

    pub(crate) fn current(&self) -> Option<&CameraIntrinsics> {
        self.current.as_ref()
    }

    fn rebuild(&mut self) {
        self.current = match (self.matrix, self.distortion) {
            (Some(matrix), Some(distortion)) => {
                CameraIntrinsics::from_parts(matrix, distortion).ok()
            }
            _ => None,
        };
    }
}

struct RateStats {
    last: Option<Instant>,
    smoothed_fps: f32,
}

pub(crate) struct FrameProcessor {
    pipeline: DetectionPipeline,
    pub(crate) intrinsics: Mutex<IntrinsicsSlot>,
    pub(crate) marker_size: Mutex<f64>,
    pub(crate) results: ResultStore,
    pub(crate) preview: PreviewThrottle,
    frames_handled: AtomicU64,
    stats: Mutex<RateStats>,
}

impl FrameProcessor {
    pub(crate) fn new(
        pipeline: DetectionPipeline,
        marker_size: f64,
        preview: PreviewThrottle,
    ) -> Self {
        Self {
            pipeline,
            intrinsics: Mutex::new(IntrinsicsSlot::default()),
            marker_size: Mutex::new(marker_size),
            results: ResultStore::new(),
            preview,
            frames_handled: AtomicU64::new(0),
            stats: Mutex::new(RateStats {
                last: None,
                smoothed_fps: 0.0,
            }),
        }
    }

    /// Completions handled so far, including frames that were dropped as
    /// unsupported.
    pub(crate) fn frames_handled(&self) -> u64 {
        self.frames_handled.load(Ordering::SeqCst)
    }

    fn beat(&self) {
        let handled = self.frames_handled.fetch_add(1, Ordering::SeqCst) + 1;

        let mut stats = self.stats.lock().expect("stats lock");
        let now = Instant::now();
        if let Some(last) = stats.last {
            let elapsed = now.duration_since(last).as_secs_f32();
            if elapsed > 0.0 {
                let instant = 1.0 / elapsed;
                stats.smoothed_fps = if stats.smoothed_fps == 0.0 {
                    instant
                } else {
                    0.9 * stats.smoothed_fps + 0.1 * instant
                };
            }
        }
        stats.last = Some(now);

        if handled % HEARTBEAT_EVERY == 0 {
            debug!(
                frames = handled,
                fps = stats.smoothed_fps,
                "capture heartbeat"
            );
        }
        metrics::gauge!("tracker_pipeline_fps").set(stats.smoothed_fps as f64);
    }
}

impl FrameSink for FrameProcessor {
    fn on_frame(&self, frame: RawFrame<'_>) {
        self.beat();

        let Some(image) = normalize(frame.data, frame.width, frame.height) else {
            debug!(
                sequence = frame.sequence,
                bytes = frame.data.len(),
                "dropping frame with unsupported byte length"
            );
            metrics::counter!("tracker_frames_dropped_total", "reason" => "byte_length")
                .increment(1);
            return;
        };

        // Copy the calibration out; detection never runs under a lock.
        let intrinsics = self.intrinsics.lock().expect("intrinsics lock").current().cloned();
        let marker_size = *self.marker_size.lock().expect("marker size lock");

        let started = Instant::now();
        let snapshot = self.pipeline.detect(
            &image,
            intrinsics.as_ref(),
            marker_size,
            frame.sequence,
            frame.timestamp_ms,
        );
        metrics::histogram!("tracker_detect_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("tracker_frames_processed_total").increment(1);

        self.results.publish(snapshot);
        self.preview.admit(&image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const K: [f64; 9] = [600.0, 0.0, 320.0, 0.0, 600.0, 240.0, 0.0, 0.0, 1.0];

    #[test]
    fn intrinsics_require_both_halves() {
        let mut slot = IntrinsicsSlot::default();
        assert!(slot.current().is_none());

        slot.set_matrix(K);
        assert!(slot.current().is_none());
        assert_eq!(slot.matrix(), Some(K));

        slot.set_distortion([0.0; 4]);
        assert!(slot.current().is_some());
    }

    #[test]
    fn malformed_values_keep_the_slot_uninitialized() {
        let mut slot = IntrinsicsSlot::default();
        slot.set_matrix([0.0; 9]);
        slot.set_distortion([0.0; 4]);
        assert!(slot.current().is_none());

        // Replacing the bad matrix repairs the slot.
        slot.set_matrix(K);
        assert!(slot.current().is_some());
    }
}
