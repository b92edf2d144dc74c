//! Marker detection core: canonical images, capability contracts, and the
//! detection pass that turns one frame into one result snapshot.
//!
//! The fiducial decoding algorithm itself is not implemented here; it arrives
//! through the [`MarkerDetector`] trait, and pose recovery through
//! [`PoseSolver`]. The crate supplies the surrounding machinery plus a planar
//! pose solver good enough to run the pipeline end to end.

pub mod detect;
pub mod intrinsics;
pub mod normalize;
pub mod pipeline;
pub mod pose;
pub mod synthetic;

use nalgebra::Vector2;

/// 2D point in pixel coordinates.
pub type Point2f = Vector2<f32>;

/// The four corners of a detected marker, in the detector's native order.
pub type MarkerCorners = [Point2f; 4];

pub use detect::{MarkerDetector, MarkerObservation, MarkerPose, PoseSolver};
pub use intrinsics::{CameraIntrinsics, IntrinsicsError};
pub use normalize::normalize;
pub use pipeline::{DetectionPipeline, DetectionResult, ResultSnapshot};
pub use pose::PlanarPoseSolver;
