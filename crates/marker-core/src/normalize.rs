//! Raw sensor bytes → canonical 8-bit single-channel image.

use image::GrayImage;
use tracing::trace;

/// Convert one mapped frame into the canonical image.
///
/// Exactly two byte-length classes are accepted: `width*height` is taken as
/// 8-bit and passed through unchanged, `width*height*2` as little-endian
/// 16-bit and scaled to 8-bit by keeping the high byte (a 1/256 rescale).
/// Every other length yields `None` and the caller treats the cycle as "zero
/// detections"; nothing panics and nothing propagates. Downstream detection
/// depends on this exact policy matching the sensor's bit depth.
pub fn normalize(raw: &[u8], width: u32, height: u32) -> Option<GrayImage> {
    let pixels = (width as usize).checked_mul(height as usize)?;
    if pixels == 0 {
        return None;
    }

    if raw.len() == pixels {
        return GrayImage::from_raw(width, height, raw.to_vec());
    }

    if raw.len() == pixels * 2 {
        let data = raw.chunks_exact(2).map(|pair| pair[1]).collect();
        return GrayImage::from_raw(width, height, data);
    }

    trace!(
        bytes = raw.len(),
        expected_8bit = pixels,
        expected_16bit = pixels * 2,
        "unsupported frame byte length"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_bit_frames_pass_through_unchanged() {
        let raw: Vec<u8> = (0..12).collect();
        let img = normalize(&raw, 4, 3).unwrap();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.as_raw(), &raw);
    }

    #[test]
    fn sixteen_bit_frames_keep_the_high_byte() {
        // Little-endian u16 values 0x0000, 0x0180, 0xFF40, 0x7FFF.
        let raw = [0x00, 0x00, 0x80, 0x01, 0x40, 0xFF, 0xFF, 0x7F];
        let img = normalize(&raw, 2, 2).unwrap();
        assert_eq!(img.as_raw(), &vec![0x00, 0x01, 0xFF, 0x7F]);
    }

    #[test]
    fn high_byte_matches_division_by_256() {
        let value: u16 = 0x3A7C;
        let raw = value.to_le_bytes();
        let img = normalize(&raw, 1, 1).unwrap();
        assert_eq!(img.as_raw()[0], (value / 256) as u8);
    }

    #[test]
    fn other_byte_lengths_are_rejected() {
        assert!(normalize(&[0; 11], 4, 3).is_none());
        assert!(normalize(&[0; 25], 4, 3).is_none());
        assert!(normalize(&[], 4, 3).is_none());
    }

    #[test]
    fn degenerate_dimensions_are_rejected() {
        assert!(normalize(&[], 0, 3).is_none());
    }
}
