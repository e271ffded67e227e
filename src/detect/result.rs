use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Axis-aligned box in pixel coordinates. `x_max`/`y_max` are exclusive edges.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Build from a centre point and size.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// Finite coordinates with min <= max on both axes. Zero-area boxes pass.
    pub fn is_well_formed(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite())
            && self.x_min <= self.x_max
            && self.y_min <= self.y_max
    }

    /// Intersection over union.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let iy = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Single detector output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    /// 0..=1
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }
}

/// Reject malformed detector output before it reaches calibration or fusion.
pub fn validate_detections(detections: &[Detection]) -> PipelineResult<()> {
    for (index, det) in detections.iter().enumerate() {
        if !det.bbox.is_well_formed() {
            return Err(PipelineError::ModelInference(format!(
                "detection {} has malformed box {:?}",
                index, det.bbox
            )));
        }
        if !(0.0..=1.0).contains(&det.confidence) {
            return Err(PipelineError::ModelInference(format!(
                "detection {} confidence {} outside 0..=1",
                index, det.confidence
            )));
        }
    }
    Ok(())
}

/// Index of the highest-confidence detection, optionally restricted to one
/// label. Ties keep the earliest detection.
pub fn primary_index(detections: &[Detection], label: Option<&str>) -> Option<usize> {
    detections
        .iter()
        .enumerate()
        .filter(|(_, det)| label.map_or(true, |l| det.label == l))
        .fold(None, |best: Option<(usize, f32)>, (i, det)| match best {
            Some((_, c)) if c >= det.confidence => best,
            _ => Some((i, det.confidence)),
        })
        .map(|(i, _)| i)
}

pub fn primary_detection<'a>(
    detections: &'a [Detection],
    label: Option<&str>,
) -> Option<&'a Detection> {
    primary_index(detections, label).map(|i| &detections[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), label, confidence)
    }

    #[test]
    fn primary_detection_prefers_highest_confidence() {
        let dets = vec![det("drone", 0.4), det("bird", 0.9), det("drone", 0.7)];
        assert_eq!(primary_detection(&dets, None).unwrap().label, "bird");
        assert_eq!(primary_detection(&dets, Some("drone")).unwrap().confidence, 0.7);
        assert!(primary_detection(&dets, Some("plane")).is_none());
        assert!(primary_detection(&[], None).is_none());
        assert_eq!(primary_index(&dets, Some("drone")), Some(2));
    }

    #[test]
    fn primary_detection_keeps_first_on_ties() {
        let mut first = det("drone", 0.5);
        first.bbox.x_max = 3.0;
        let dets = vec![first.clone(), det("drone", 0.5)];
        assert_eq!(primary_detection(&dets, None), Some(&first));
    }

    #[test]
    fn validation_rejects_inverted_box_and_bad_confidence() {
        let inverted = Detection::new(BoundingBox::new(5.0, 0.0, 1.0, 4.0), "drone", 0.5);
        assert!(validate_detections(&[inverted]).is_err());
        assert!(validate_detections(&[det("drone", 1.5)]).is_err());
        let nan = Detection::new(BoundingBox::new(f32::NAN, 0.0, 1.0, 4.0), "drone", 0.5);
        assert!(validate_detections(&[nan]).is_err());
        // Degenerate but ordered boxes are the fusion engine's problem.
        let point = Detection::new(BoundingBox::new(3.0, 3.0, 3.0, 3.0), "drone", 0.5);
        assert!(validate_detections(&[point, det("drone", 1.0)]).is_ok());
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        let c = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&c) - 1.0 / 3.0).abs() < 1e-6);
    }
}
