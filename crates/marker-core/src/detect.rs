//! Capability contracts for marker detection and pose solving.

use image::GrayImage;
use nalgebra::Vector3;

use crate::{CameraIntrinsics, MarkerCorners};

/// One marker found in a canonical image: its decoded identifier and corner
/// polygon in pixel coordinates.
#[derive(Clone, Debug)]
pub struct MarkerObservation {
    pub id: i32,
    pub corners: MarkerCorners,
}

/// Pose of one marker relative to the camera: an axis-angle rotation vector
/// and a translation vector, both in meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerPose {
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl Default for MarkerPose {
    /// The zero pose, doubling as the degraded-mode placeholder.
    fn default() -> Self {
        Self {
            rotation: Vector3::zeros(),
            translation: Vector3::zeros(),
        }
    }
}

/// The external fiducial-decoding capability.
///
/// Input is a canonical 8-bit single-channel image; output order is the
/// detector's own and is preserved all the way to the consumer.
pub trait MarkerDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> Vec<MarkerObservation>;
}

/// The external pose-recovery capability.
///
/// Returns one pose per observation, in the same order. `marker_size` is the
/// physical edge length of the printed marker in meters.
pub trait PoseSolver: Send + Sync {
    fn solve(
        &self,
        observations: &[MarkerObservation],
        marker_size: f64,
        intrinsics: &CameraIntrinsics,
    ) -> Vec<MarkerPose>;
}
