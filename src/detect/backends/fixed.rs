use crate::detect::backend::Detector;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub backend for tests and scripted runs. Returns the same detections for
/// every frame, in the order they were configured.
#[derive(Clone, Debug, Default)]
pub struct FixedDetector {
    detections: Vec<Detection>,
}

impl FixedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl Detector for FixedDetector {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(&mut self, _frame: &Frame) -> Vec<Detection> {
        self.detections.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    #[test]
    fn fixed_detector_repeats_configured_detections() {
        let frame = Frame::new(vec![0u8; 12], 2, 2).unwrap();
        let dets = vec![
            Detection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), "drone", 0.9),
            Detection::new(BoundingBox::new(1.0, 1.0, 2.0, 2.0), "bird", 0.3),
        ];
        let mut detector = FixedDetector::new(dets.clone());

        assert_eq!(detector.detect(&frame), dets);
        assert_eq!(detector.detect(&frame), dets);
        assert!(FixedDetector::default().detect(&frame).is_empty());
    }
}
