//! Validated camera intrinsics.

use nalgebra::{Matrix3, Vector4};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum IntrinsicsError {
    #[error("camera matrix contains non-finite values")]
    NonFinite,
    #[error("focal lengths must be positive (fx={fx}, fy={fy})")]
    BadFocal { fx: f64, fy: f64 },
    #[error("camera matrix is not invertible")]
    Singular,
}

/// Projection matrix plus distortion coefficients, immutable once built.
///
/// Construction is the validation boundary: a value of this type is always
/// well-formed, so the detection pipeline treats "intrinsics present" and
/// "pose estimation possible" as the same condition.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraIntrinsics {
    matrix: Matrix3<f64>,
    distortion: Vector4<f64>,
}

impl CameraIntrinsics {
    /// Build from a row-major 3×3 matrix and a k1, k2, p1, p2 distortion
    /// vector.
    pub fn from_parts(matrix: [f64; 9], distortion: [f64; 4]) -> Result<Self, IntrinsicsError> {
        if !matrix.iter().chain(distortion.iter()).all(|v| v.is_finite()) {
            return Err(IntrinsicsError::NonFinite);
        }
        let matrix = Matrix3::from_row_slice(&matrix);
        let (fx, fy) = (matrix[(0, 0)], matrix[(1, 1)]);
        if fx <= 0.0 || fy <= 0.0 {
            return Err(IntrinsicsError::BadFocal { fx, fy });
        }
        if matrix.try_inverse().is_none() {
            return Err(IntrinsicsError::Singular);
        }
        Ok(Self {
            matrix,
            distortion: Vector4::from_column_slice(&distortion),
        })
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn distortion(&self) -> &Vector4<f64> {
        &self.distortion
    }

    pub fn fx(&self) -> f64 {
        self.matrix[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.matrix[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.matrix[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.matrix[(1, 2)]
    }

    /// Row-major copy of the projection matrix.
    pub fn matrix_row_major(&self) -> [f64; 9] {
        let m = &self.matrix;
        [
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
        ]
    }

    pub fn distortion_array(&self) -> [f64; 4] {
        [
            self.distortion[0],
            self.distortion[1],
            self.distortion[2],
            self.distortion[3],
        ]
    }
}
