//! Planar pose recovery from marker corners.
//!
//! Classic pipeline: undistort the four corners, fit the plane→image
//! homography by DLT, and decompose it against the intrinsics into a
//! rotation and translation (the marker lies on Z = 0 in its own frame).

use nalgebra::{Matrix3, Rotation3, SMatrix, SymmetricEigen, Vector2, Vector3};
use tracing::trace;

use crate::detect::{MarkerObservation, MarkerPose, PoseSolver};
use crate::{CameraIntrinsics, Point2f};

const UNDISTORT_ITERATIONS: usize = 5;

/// Pose solver for square planar markers.
///
/// Corners are expected in the usual fiducial order: top-left, top-right,
/// bottom-right, bottom-left as seen with the marker upright. A marker whose
/// corners are degenerate yields the zero pose rather than an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanarPoseSolver;

impl PoseSolver for PlanarPoseSolver {
    fn solve(
        &self,
        observations: &[MarkerObservation],
        marker_size: f64,
        intrinsics: &CameraIntrinsics,
    ) -> Vec<MarkerPose> {
        observations
            .iter()
            .map(|observation| {
                solve_single(&observation.corners, marker_size, intrinsics).unwrap_or_else(|| {
                    trace!(id = observation.id, "degenerate corners, zero pose");
                    MarkerPose::default()
                })
            })
            .collect()
    }
}

fn solve_single(
    corners: &[Point2f; 4],
    marker_size: f64,
    intrinsics: &CameraIntrinsics,
) -> Option<MarkerPose> {
    let half = marker_size * 0.5;
    let object = [
        Vector2::new(-half, -half),
        Vector2::new(half, -half),
        Vector2::new(half, half),
        Vector2::new(-half, half),
    ];
    let ideal: Vec<Vector2<f64>> = corners
        .iter()
        .map(|corner| undistort(corner, intrinsics))
        .collect();

    let h = dlt_homography(&object, &ideal)?;
    decompose_homography(&h, intrinsics.matrix())
}

/// Remove lens distortion from a pixel coordinate, returning ideal pixel
/// coordinates. Fixed-point iteration on the normalized coordinates; the
/// distortion model is k1, k2, p1, p2.
fn undistort(corner: &Point2f, intrinsics: &CameraIntrinsics) -> Vector2<f64> {
    let d = intrinsics.distortion();
    let (k1, k2, p1, p2) = (d[0], d[1], d[2], d[3]);

    let xd = (corner.x as f64 - intrinsics.cx()) / intrinsics.fx();
    let yd = (corner.y as f64 - intrinsics.cy()) / intrinsics.fy();

    let mut x = xd;
    let mut y = yd;
    for _ in 0..UNDISTORT_ITERATIONS {
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
        let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        x = (xd - dx) / radial;
        y = (yd - dy) / radial;
    }

    Vector2::new(
        intrinsics.fx() * x + intrinsics.cx(),
        intrinsics.fy() * y + intrinsics.cy(),
    )
}

/// Estimate H such that `image ~ H * object` from four correspondences.
///
/// The DLT system is solved through its 9×9 normal matrix so the null-space
/// vector is available even in the minimal four-point case.
fn dlt_homography(object: &[Vector2<f64>; 4], image: &[Vector2<f64>]) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 9>::zeros();
    for (i, (po, pi)) in object.iter().zip(image.iter()).enumerate() {
        let (x, y) = (po.x, po.y);
        let (u, v) = (pi.x, pi.y);
        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let eigen = SymmetricEigen::new(a.transpose() * a);
    let mut min_index = 0;
    for i in 1..9 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_index] {
            min_index = i;
        }
    }
    let h = eigen.eigenvectors.column(min_index);

    let mut h_mat = Matrix3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            h_mat[(r, c)] = h[3 * r + c];
        }
    }
    let scale = h_mat[(2, 2)];
    if scale.abs() < f64::EPSILON || !h_mat.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(h_mat / scale)
}

/// Decompose a plane-induced homography into rotation and translation.
fn decompose_homography(h: &Matrix3<f64>, k: &Matrix3<f64>) -> Option<MarkerPose> {
    let k_inv = k.try_inverse()?;

    let h1 = k_inv * h.column(0);
    let h2 = k_inv * h.column(1);
    let h3 = k_inv * h.column(2);

    let norm1 = h1.norm();
    let norm2 = h2.norm();
    if norm1 < f64::EPSILON || norm2 < f64::EPSILON {
        return None;
    }
    let mut lambda = 1.0 / ((norm1 + norm2) * 0.5);

    // The marker sits in front of the camera; flip the scale if the
    // decomposition put it behind.
    if lambda * h3.z < 0.0 {
        lambda = -lambda;
    }

    let r1 = lambda * h1;
    let r2 = lambda * h2;
    let r3 = r1.cross(&r2);
    let translation: Vector3<f64> = lambda * h3;

    let mut r_mat = Matrix3::zeros();
    r_mat.set_column(0, &r1);
    r_mat.set_column(1, &r2);
    r_mat.set_column(2, &r3);

    // Project onto SO(3): polar decomposition via SVD.
    let svd = r_mat.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    let rotation = Rotation3::from_matrix_unchecked(r_orth).scaled_axis();
    if !rotation.iter().chain(translation.iter()).all(|v| v.is_finite()) {
        return None;
    }
    Some(MarkerPose {
        rotation,
        translation,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector4};

    use super::*;

    fn intrinsics(distortion: [f64; 4]) -> CameraIntrinsics {
        CameraIntrinsics::from_parts(
            [800.0, 0.0, 640.0, 0.0, 780.0, 360.0, 0.0, 0.0, 1.0],
            distortion,
        )
        .unwrap()
    }

    /// Project a marker-frame point through pose + intrinsics + distortion.
    fn project(
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        point: Vector2<f64>,
        intrinsics: &CameraIntrinsics,
    ) -> Point2f {
        let camera = rotation * Point3::new(point.x, point.y, 0.0) + translation;
        let x = camera.x / camera.z;
        let y = camera.y / camera.z;

        let d: &Vector4<f64> = intrinsics.distortion();
        let (k1, k2, p1, p2) = (d[0], d[1], d[2], d[3]);
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

        Vector2::new(
            (intrinsics.fx() * xd + intrinsics.cx()) as f32,
            (intrinsics.fy() * yd + intrinsics.cy()) as f32,
        )
    }

    fn observe(
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        marker_size: f64,
        intrinsics: &CameraIntrinsics,
    ) -> MarkerObservation {
        let half = marker_size * 0.5;
        let object = [
            Vector2::new(-half, -half),
            Vector2::new(half, -half),
            Vector2::new(half, half),
            Vector2::new(-half, half),
        ];
        let corners = object.map(|p| project(rotation, translation, p, intrinsics));
        MarkerObservation { id: 0, corners }
    }

    #[test]
    fn frontal_marker_recovers_distance() {
        let intrinsics = intrinsics([0.0; 4]);
        let rotation = Rotation3::identity();
        let translation = Vector3::new(0.0, 0.0, 0.5);
        let observation = observe(&rotation, &translation, 0.05, &intrinsics);

        let poses = PlanarPoseSolver.solve(&[observation], 0.05, &intrinsics);
        assert_eq!(poses.len(), 1);
        assert_relative_eq!(poses[0].translation.z, 0.5, max_relative = 1e-3);
        assert!(poses[0].rotation.norm() < 1e-3);
    }

    #[test]
    fn tilted_pose_round_trips() {
        let intrinsics = intrinsics([0.0; 4]);
        let rotation = Rotation3::from_euler_angles(0.1, -0.05, 0.2);
        let translation = Vector3::new(0.1, -0.05, 1.0);
        let observation = observe(&rotation, &translation, 0.08, &intrinsics);

        let poses = PlanarPoseSolver.solve(&[observation], 0.08, &intrinsics);
        let pose = &poses[0];
        assert_relative_eq!(pose.translation.x, translation.x, epsilon = 1e-3);
        assert_relative_eq!(pose.translation.y, translation.y, epsilon = 1e-3);
        assert_relative_eq!(pose.translation.z, translation.z, epsilon = 1e-3);
        assert!((pose.rotation - rotation.scaled_axis()).norm() < 1e-2);
    }

    #[test]
    fn distorted_corners_are_compensated() {
        let intrinsics = intrinsics([-0.1, 0.02, 0.001, -0.001]);
        let rotation = Rotation3::identity();
        let translation = Vector3::new(0.05, 0.02, 0.6);
        let observation = observe(&rotation, &translation, 0.05, &intrinsics);

        let poses = PlanarPoseSolver.solve(&[observation], 0.05, &intrinsics);
        assert_relative_eq!(poses[0].translation.z, 0.6, max_relative = 5e-3);
    }

    #[test]
    fn degenerate_corners_yield_zero_pose() {
        let intrinsics = intrinsics([0.0; 4]);
        let corner = Vector2::new(100.0_f32, 100.0_f32);
        let observation = MarkerObservation {
            id: 1,
            corners: [corner; 4],
        };
        let poses = PlanarPoseSolver.solve(&[observation], 0.05, &intrinsics);
        assert_eq!(poses[0], MarkerPose::default());
    }
}
