//! Decimated low-resolution preview of accepted frames.

use std::sync::Mutex;

use image::GrayImage;
use image::imageops::{self, FilterType};

/// A downsized canonical image plus the generation that produced it. The
/// generation only ever grows, so consumers can cheaply tell "new frame"
/// from "same frame".
#[derive(Clone, Debug)]
pub struct PreviewFrame {
    pub image: GrayImage,
    pub generation: u64,
}

struct State {
    counter: u64,
    enabled: bool,
    generation: u64,
    stored: Option<PreviewFrame>,
}

/// Admits one of every `stride` frames into a stored preview.
///
/// Runs on the capture callback thread at its own cadence, independent of
/// result publication. While disabled, `admit` is a no-op and the stored
/// frame is released so the throttle holds no memory.
pub struct PreviewThrottle {
    stride: u64,
    target_width: u32,
    state: Mutex<State>,
}

impl PreviewThrottle {
    pub fn new(stride: u64, target_width: u32) -> Self {
        Self {
            stride: stride.max(1),
            target_width: target_width.max(1),
            state: Mutex::new(State {
                counter: 0,
                enabled: false,
                generation: 0,
                stored: None,
            }),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().expect("preview lock");
        state.enabled = enabled;
        if !enabled {
            state.stored = None;
        }
    }

    pub fn enabled(&self) -> bool {
        self.state.lock().expect("preview lock").enabled
    }

    /// Offer a frame; returns whether this call updated the stored preview.
    ///
    /// The resize happens outside the lock; the critical sections are
    /// copy-in/copy-out only.
    pub fn admit(&self, image: &GrayImage) -> bool {
        {
            let mut state = self.state.lock().expect("preview lock");
            if !state.enabled {
                return false;
            }
            let slot = state.counter;
            state.counter += 1;
            if slot % self.stride != 0 {
                return false;
            }
        }

        let resized = self.downsize(image);

        let mut state = self.state.lock().expect("preview lock");
        if !state.enabled {
            return false;
        }
        state.generation += 1;
        state.stored = Some(PreviewFrame {
            image: resized,
            generation: state.generation,
        });
        true
    }

    /// Most recently admitted frame, if feedback is enabled and one exists.
    pub fn preview(&self) -> Option<PreviewFrame> {
        self.state.lock().expect("preview lock").stored.clone()
    }

    fn downsize(&self, image: &GrayImage) -> GrayImage {
        let (width, height) = image.dimensions();
        if width <= self.target_width {
            return image.clone();
        }
        let target_height =
            ((height as u64 * self.target_width as u64) / width as u64).max(1) as u32;
        imageops::resize(image, self.target_width, target_height, FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> GrayImage {
        GrayImage::from_pixel(width, height, image::Luma([128]))
    }

    #[test]
    fn admits_exactly_one_in_every_stride() {
        let throttle = PreviewThrottle::new(10, 64);
        throttle.set_enabled(true);

        let admitted: Vec<bool> = (0..30).map(|_| throttle.admit(&frame(64, 48))).collect();
        assert_eq!(admitted.iter().filter(|&&a| a).count(), 3);
        assert!(admitted[0] && admitted[10] && admitted[20]);
    }

    #[test]
    fn disabled_throttle_ignores_frames_and_clears_storage() {
        let throttle = PreviewThrottle::new(1, 64);
        throttle.set_enabled(true);
        assert!(throttle.admit(&frame(64, 48)));
        assert!(throttle.preview().is_some());

        throttle.set_enabled(false);
        assert!(throttle.preview().is_none());
        assert!(!throttle.admit(&frame(64, 48)));
        assert!(throttle.preview().is_none());

        throttle.set_enabled(true);
        assert!(throttle.admit(&frame(64, 48)));
        assert!(throttle.preview().is_some());
    }

    #[test]
    fn generation_is_monotonic_across_clears() {
        let throttle = PreviewThrottle::new(1, 64);
        throttle.set_enabled(true);
        throttle.admit(&frame(64, 48));
        let first = throttle.preview().unwrap().generation;

        throttle.set_enabled(false);
        throttle.set_enabled(true);
        throttle.admit(&frame(64, 48));
        let second = throttle.preview().unwrap().generation;
        assert!(second > first);
    }

    #[test]
    fn stored_preview_is_downsized() {
        let throttle = PreviewThrottle::new(1, 320);
        throttle.set_enabled(true);
        throttle.admit(&frame(1280, 800));
        let preview = throttle.preview().unwrap();
        assert_eq!(preview.image.dimensions(), (320, 200));
    }

    #[test]
    fn small_frames_are_stored_as_is() {
        let throttle = PreviewThrottle::new(1, 320);
        throttle.set_enabled(true);
        throttle.admit(&frame(160, 120));
        assert_eq!(throttle.preview().unwrap().image.dimensions(), (160, 120));
    }
}
