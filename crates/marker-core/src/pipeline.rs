//! One frame in, one result snapshot out.

use image::GrayImage;
use nalgebra::Vector3;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::detect::{MarkerDetector, MarkerPose, PoseSolver};
use crate::{CameraIntrinsics, MarkerCorners};

/// A detected marker with its recovered (or degraded) pose.
#[derive(Clone, Debug, Serialize)]
pub struct DetectionResult {
    pub id: i32,
    pub corners: MarkerCorners,
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

/// Every result of one completed detection pass. Snapshots replace each
/// other wholesale; results from two passes never mix.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ResultSnapshot {
    pub results: Vec<DetectionResult>,
    pub sequence: u64,
    pub timestamp_ms: i64,
}

/// Runs the detection capability, then the pose capability, and assembles
/// typed results.
pub struct DetectionPipeline {
    detector: Arc<dyn MarkerDetector>,
    solver: Arc<dyn PoseSolver>,
}

impl DetectionPipeline {
    pub fn new(detector: Arc<dyn MarkerDetector>, solver: Arc<dyn PoseSolver>) -> Self {
        Self { detector, solver }
    }

    /// Detect markers and estimate their poses.
    ///
    /// Without intrinsics the pass runs in degraded mode: identifiers and
    /// corners are still reported, but every rotation and translation is the
    /// zero vector. That placeholder is deliberate and consumers rely on it;
    /// do not "fix" it by omitting the pose fields. Repeated identifiers are
    /// reported as the detector returned them, without deduplication.
    pub fn detect(
        &self,
        image: &GrayImage,
        intrinsics: Option<&CameraIntrinsics>,
        marker_size: f64,
        sequence: u64,
        timestamp_ms: i64,
    ) -> ResultSnapshot {
        let observations = self.detector.detect(image);

        let poses: Vec<MarkerPose> = match intrinsics {
            Some(intrinsics) if !observations.is_empty() => {
                self.solver.solve(&observations, marker_size, intrinsics)
            }
            _ => Vec::new(),
        };

        if !observations.is_empty() {
            debug!(
                sequence,
                markers = observations.len(),
                degraded = intrinsics.is_none(),
                "detection pass complete"
            );
        }

        let results = observations
            .into_iter()
            .enumerate()
            .map(|(i, observation)| {
                let pose = poses.get(i).copied().unwrap_or_default();
                DetectionResult {
                    id: observation.id,
                    corners: observation.corners,
                    rotation: pose.rotation,
                    translation: pose.translation,
                }
            })
            .collect();

        ResultSnapshot {
            results,
            sequence,
            timestamp_ms,
        }
    }
}
