//! Calibration file loading.
//!
//! The document is JSON with a `calibration` object holding a 3×3
//! `camera_matrix` (row-major rows) and a 4-element `dist_coeffs` array.
//! A failed load is recoverable: intrinsics simply stay uninitialized and
//! detection carries on in degraded mode.

use std::fs;
use std::path::Path;

use marker_core::{CameraIntrinsics, IntrinsicsError};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("failed to read calibration file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse calibration file")]
    Parse(#[from] serde_json::Error),
    #[error("calibration values rejected")]
    Invalid(#[from] IntrinsicsError),
}

#[derive(Deserialize)]
struct CalibrationFile {
    calibration: CalibrationRecord,
}

#[derive(Deserialize)]
struct CalibrationRecord {
    camera_matrix: [[f64; 3]; 3],
    dist_coeffs: [f64; 4],
}

/// Load and validate camera parameters from `path`.
pub fn load_camera_parameters(path: &Path) -> Result<CameraIntrinsics, CalibrationError> {
    let text = fs::read_to_string(path)?;
    let document: CalibrationFile = serde_json::from_str(&text)?;

    let rows = document.calibration.camera_matrix;
    let mut matrix = [0.0; 9];
    for (r, row) in rows.iter().enumerate() {
        matrix[r * 3..r * 3 + 3].copy_from_slice(row);
    }

    Ok(CameraIntrinsics::from_parts(
        matrix,
        document.calibration.dist_coeffs,
    )?)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp calibration file");
        file.write_all(content.as_bytes()).expect("write calibration");
        file
    }

    const GOOD: &str = r#"{
        "calibration": {
            "camera_matrix": [[600.0, 0.0, 320.0], [0.0, 600.0, 240.0], [0.0, 0.0, 1.0]],
            "dist_coeffs": [-0.1, 0.02, 0.0, 0.0]
        }
    }"#;

    #[test]
    fn loads_a_well_formed_document() {
        let file = write_file(GOOD);
        let intrinsics = load_camera_parameters(file.path()).unwrap();
        assert_eq!(intrinsics.fx(), 600.0);
        assert_eq!(intrinsics.distortion_array()[0], -0.1);
    }

    #[test]
    fn wrong_matrix_shape_is_a_parse_error() {
        let file = write_file(
            r#"{"calibration": {"camera_matrix": [[1.0, 0.0], [0.0, 1.0]], "dist_coeffs": [0.0, 0.0, 0.0, 0.0]}}"#,
        );
        assert!(matches!(
            load_camera_parameters(file.path()),
            Err(CalibrationError::Parse(_))
        ));
    }

    #[test]
    fn wrong_coefficient_count_is_a_parse_error() {
        let file = write_file(
            r#"{"calibration": {"camera_matrix": [[600.0, 0.0, 320.0], [0.0, 600.0, 240.0], [0.0, 0.0, 1.0]], "dist_coeffs": [0.0, 0.0, 0.0]}}"#,
        );
        assert!(matches!(
            load_camera_parameters(file.path()),
            Err(CalibrationError::Parse(_))
        ));
    }

    #[test]
    fn missing_section_is_a_parse_error() {
        let file = write_file(r#"{"camera_matrix": []}"#);
        assert!(matches!(
            load_camera_parameters(file.path()),
            Err(CalibrationError::Parse(_))
        ));
    }

    #[test]
    fn invalid_values_are_rejected_after_parsing() {
        let file = write_file(
            r#"{"calibration": {"camera_matrix": [[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]], "dist_coeffs": [0.0, 0.0, 0.0, 0.0]}}"#,
        );
        assert!(matches!(
            load_camera_parameters(file.path()),
            Err(CalibrationError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_camera_parameters(Path::new("/nonexistent/calibration.json")),
            Err(CalibrationError::Io(_))
        ));
    }
}
