//! Synthetic scenes for exercising the pipeline.
//!
//! The renderer paints a dark square on a light background exactly where a
//! marker of the given size and distance would project, and
//! [`DarkQuadDetector`] recovers that square's corners by thresholding. The
//! pair stands in for a real fiducial capability in the demo binary and the
//! end-to-end tests; it decodes nothing.

use image::GrayImage;
use nalgebra::Vector2;

use crate::detect::{MarkerDetector, MarkerObservation};
use crate::{CameraIntrinsics, Point2f};

const BACKGROUND: u8 = 220;
const MARKER: u8 = 25;

/// A single frontal marker facing the camera at a known distance.
#[derive(Clone, Debug)]
pub struct SyntheticScene {
    pub intrinsics: CameraIntrinsics,
    pub marker_id: i32,
    /// Marker edge length in meters.
    pub marker_size: f64,
    /// Camera-to-marker distance along the optical axis, in meters.
    pub distance: f64,
}

impl SyntheticScene {
    /// Corner projections in pixel coordinates, top-left first, clockwise.
    pub fn projected_corners(&self) -> [Vector2<f64>; 4] {
        let half = self.marker_size * 0.5;
        let object = [
            Vector2::new(-half, -half),
            Vector2::new(half, -half),
            Vector2::new(half, half),
            Vector2::new(-half, half),
        ];
        object.map(|p| {
            Vector2::new(
                self.intrinsics.fx() * (p.x / self.distance) + self.intrinsics.cx(),
                self.intrinsics.fy() * (p.y / self.distance) + self.intrinsics.cy(),
            )
        })
    }

    /// Render the scene as a canonical 8-bit image.
    pub fn render(&self, width: u32, height: u32) -> GrayImage {
        let corners = self.projected_corners();
        let mut image = GrayImage::from_pixel(width, height, image::Luma([BACKGROUND]));
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let center = Vector2::new(x as f64 + 0.5, y as f64 + 0.5);
            if inside_convex_quad(&corners, center) {
                *pixel = image::Luma([MARKER]);
            }
        }
        image
    }

    /// Render as little-endian 16-bit sensor bytes (each sample in the high
    /// byte), for driving the 16-bit normalization path.
    pub fn render_16bit(&self, width: u32, height: u32) -> Vec<u8> {
        self.render(width, height)
            .into_raw()
            .into_iter()
            .flat_map(|value| ((value as u16) << 8).to_le_bytes())
            .collect()
    }
}

fn inside_convex_quad(corners: &[Vector2<f64>; 4], point: Vector2<f64>) -> bool {
    let mut sign = 0.0_f64;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let cross = (b.x - a.x) * (point.y - a.y) - (b.y - a.y) * (point.x - a.x);
        if cross.abs() < f64::EPSILON {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Finds the dark quad painted by [`SyntheticScene`].
///
/// Corner recovery takes the extreme dark pixels along the two diagonal
/// directions, which is exact for the frontal squares the renderer produces.
/// Always reports the configured identifier.
#[derive(Clone, Copy, Debug)]
pub struct DarkQuadDetector {
    pub id: i32,
    pub threshold: u8,
}

impl DarkQuadDetector {
    pub fn new(id: i32) -> Self {
        Self { id, threshold: 128 }
    }
}

impl MarkerDetector for DarkQuadDetector {
    fn detect(&self, image: &GrayImage) -> Vec<MarkerObservation> {
        let mut dark: Vec<Vector2<f64>> = Vec::new();
        for (x, y, pixel) in image.enumerate_pixels() {
            if pixel[0] < self.threshold {
                dark.push(Vector2::new(x as f64 + 0.5, y as f64 + 0.5));
            }
        }
        if dark.len() < 16 {
            return Vec::new();
        }

        let extreme = |score: &dyn Fn(&Vector2<f64>) -> f64| {
            dark.iter()
                .max_by(|a, b| score(a).total_cmp(&score(b)))
                .copied()
                .expect("dark set is nonempty")
        };
        let tl = extreme(&|p| -(p.x + p.y));
        let tr = extreme(&|p| p.x - p.y);
        let br = extreme(&|p| p.x + p.y);
        let bl = extreme(&|p| p.y - p.x);

        let corners = [tl, tr, br, bl].map(|p| Point2f::new(p.x as f32, p.y as f32));
        vec![MarkerObservation {
            id: self.id,
            corners,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> SyntheticScene {
        SyntheticScene {
            intrinsics: CameraIntrinsics::from_parts(
                [600.0, 0.0, 320.0, 0.0, 600.0, 240.0, 0.0, 0.0, 1.0],
                [0.0; 4],
            )
            .unwrap(),
            marker_id: 23,
            marker_size: 0.05,
            distance: 0.5,
        }
    }

    #[test]
    fn rendered_marker_is_detected_where_projected() {
        let scene = scene();
        let image = scene.render(640, 480);
        let observations = DarkQuadDetector::new(scene.marker_id).detect(&image);
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].id, 23);

        let expected = scene.projected_corners();
        for (corner, truth) in observations[0].corners.iter().zip(expected.iter()) {
            assert!((corner.x as f64 - truth.x).abs() < 1.5);
            assert!((corner.y as f64 - truth.y).abs() < 1.5);
        }
    }

    #[test]
    fn blank_images_yield_no_observations() {
        let image = GrayImage::from_pixel(64, 64, image::Luma([BACKGROUND]));
        assert!(DarkQuadDetector::new(1).detect(&image).is_empty());
    }

    #[test]
    fn sixteen_bit_rendering_matches_the_high_byte() {
        let scene = scene();
        let eight = scene.render(64, 64);
        let sixteen = scene.render_16bit(64, 64);
        assert_eq!(sixteen.len(), eight.as_raw().len() * 2);
        for (i, value) in eight.as_raw().iter().enumerate() {
            assert_eq!(sixteen[2 * i + 1], *value);
        }
    }
}
