use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Label emitted by the synthetic detector.
pub const DRONE_LABEL: &str = "drone";

/// Demo backend producing one plausible far-field drone box per frame.
///
/// Box size is 4-12 % of the frame width by 3-10 % of the height. The centre
/// falls in the middle half horizontally and the upper-middle band
/// (20-60 %) vertically. Seeded so runs are reproducible.
pub struct SyntheticDroneDetector {
    rng: StdRng,
}

impl SyntheticDroneDetector {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SyntheticDroneDetector {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Detector for SyntheticDroneDetector {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        if frame.is_empty() {
            return Vec::new();
        }
        let w = frame.width() as f32;
        let h = frame.height() as f32;

        let box_w = self.rng.gen_range(0.04..0.12) * w;
        let box_h = self.rng.gen_range(0.03..0.10) * h;
        let cx = self.rng.gen_range(0.25..0.75) * w;
        let cy = self.rng.gen_range(0.20..0.60) * h;
        let confidence = self.rng.gen_range(0.55..0.95);

        let raw = BoundingBox::from_center(cx, cy, box_w, box_h);
        let bbox = BoundingBox::new(
            raw.x_min.max(0.0),
            raw.y_min.max(0.0),
            raw.x_max.min(w),
            raw.y_max.min(h),
        );
        vec![Detection::new(bbox, DRONE_LABEL, confidence)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_boxes_stay_in_frame_and_in_band() {
        let frame = Frame::new(vec![0u8; 640 * 480 * 3], 640, 480).unwrap();
        let mut detector = SyntheticDroneDetector::new(7);
        for _ in 0..50 {
            let dets = detector.detect(&frame);
            assert_eq!(dets.len(), 1);
            let det = &dets[0];
            assert_eq!(det.label, DRONE_LABEL);
            assert!(det.bbox.is_well_formed());
            assert!(det.bbox.x_min >= 0.0 && det.bbox.x_max <= 640.0);
            assert!(det.bbox.y_min >= 0.0 && det.bbox.y_max <= 480.0);
            assert!(det.bbox.width() <= 0.12 * 640.0 + 1e-3);
            let (cx, cy) = det.bbox.center();
            assert!((0.2 * 640.0..=0.8 * 640.0).contains(&cx));
            assert!((0.15 * 480.0..=0.65 * 480.0).contains(&cy));
        }
    }

    #[test]
    fn same_seed_same_boxes() {
        let frame = Frame::new(vec![0u8; 64 * 48 * 3], 64, 48).unwrap();
        let mut a = SyntheticDroneDetector::new(42);
        let mut b = SyntheticDroneDetector::new(42);
        assert_eq!(a.detect(&frame), b.detect(&frame));
    }
}
