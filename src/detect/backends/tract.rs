#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;
use crate::tensor::rgb_to_nchw;

/// Decoding parameters for YOLOv8-style heads.
#[derive(Clone, Debug)]
pub struct YoloParams {
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

/// Tract-based YOLO detector.
///
/// Expects a single `[1, 4 + C, N]` output where each column is
/// `(cx, cy, w, h, score_0 .. score_C)` in model-input pixels.
pub struct TractYoloDetector {
    model: TypedRunnableModel<TypedModel>,
    params: YoloParams,
    class_names: Vec<String>,
}

impl TractYoloDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        params: YoloParams,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = params.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            params,
            class_names,
        })
    }

    fn label_for(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    fn infer(&self, frame: &Frame) -> Result<Vec<Detection>> {
        frame.ensure_inferable()?;
        let side = self.params.input_size;
        let input = rgb_to_nchw(frame, side, side, [0.0; 3], [1.0; 3]);
        let outputs = self
            .model
            .run(tvec!(input.into_tensor().into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let classes = shape[1] - 4;
        let anchors = shape[2];
        let sx = frame.width() as f32 / side as f32;
        let sy = frame.height() as f32 / side as f32;

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let (class_id, score) = (0..classes)
                .map(|c| (c, view[[0, 4 + c, i]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if score.is_nan() || score < self.params.conf_threshold {
                continue;
            }
            let raw = BoundingBox::from_center(
                view[[0, 0, i]] * sx,
                view[[0, 1, i]] * sy,
                view[[0, 2, i]] * sx,
                view[[0, 3, i]] * sy,
            );
            let Some(bbox) = clamp_to_frame(&raw, frame.width(), frame.height()) else {
                continue;
            };
            candidates.push((
                class_id,
                Detection::new(bbox, String::new(), score.min(1.0)),
            ));
        }

        let kept = non_max_suppression(
            candidates,
            self.params.iou_threshold,
            self.params.max_detections,
        );
        Ok(kept
            .into_iter()
            .map(|(class_id, mut det)| {
                det.label = self.label_for(class_id);
                det
            })
            .collect())
    }
}

impl Detector for TractYoloDetector {
    fn name(&self) -> &'static str {
        "tract-yolo"
    }

    fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        match self.infer(frame) {
            Ok(dets) => dets,
            Err(err) => {
                log::warn!(
                    "tract-yolo: inference failed, reporting no detections: {:#}",
                    err
                );
                Vec::new()
            }
        }
    }
}

/// Clip a decoded box to the frame. `None` when nothing of it is left inside
/// or its coordinates are not finite.
fn clamp_to_frame(bbox: &BoundingBox, width: u32, height: u32) -> Option<BoundingBox> {
    if !bbox.is_well_formed() {
        return None;
    }
    let (w, h) = (width as f32, height as f32);
    let clamped = BoundingBox::new(
        bbox.x_min.clamp(0.0, w),
        bbox.y_min.clamp(0.0, h),
        bbox.x_max.clamp(0.0, w),
        bbox.y_max.clamp(0.0, h),
    );
    (clamped.width() > 0.0 && clamped.height() > 0.0).then_some(clamped)
}

/// Greedy per-class NMS, highest score first.
fn non_max_suppression(
    mut candidates: Vec<(usize, Detection)>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<(usize, Detection)> {
    candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    let mut kept: Vec<(usize, Detection)> = Vec::new();
    for (class_id, det) in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|(k, other)| *k == class_id && other.bbox.iou(&det.bbox) > iou_threshold);
        if !suppressed {
            kept.push((class_id, det));
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxes_past_the_frame_edge_are_clipped_or_dropped() {
        // Centre beyond the right edge: nothing left inside.
        let outside = BoundingBox::from_center(650.0, 100.0, 4.0, 10.0);
        assert!(clamp_to_frame(&outside, 640, 480).is_none());

        // Straddling the edge: clipped, never inverted.
        let straddle = BoundingBox::from_center(638.0, 478.0, 10.0, 10.0);
        let clipped = clamp_to_frame(&straddle, 640, 480).unwrap();
        assert!(clipped.is_well_formed());
        assert_eq!((clipped.x_max, clipped.y_max), (640.0, 480.0));
        assert_eq!((clipped.x_min, clipped.y_min), (633.0, 473.0));

        let negative = BoundingBox::from_center(-2.0, 5.0, 10.0, 4.0);
        let clipped = clamp_to_frame(&negative, 640, 480).unwrap();
        assert_eq!((clipped.x_min, clipped.x_max), (0.0, 3.0));

        let nan = BoundingBox::from_center(f32::NAN, 5.0, 10.0, 4.0);
        assert!(clamp_to_frame(&nan, 640, 480).is_none());
    }

    #[test]
    fn nms_drops_overlapping_same_class_boxes() {
        let a = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), "", 0.9);
        let b = Detection::new(BoundingBox::new(1.0, 1.0, 11.0, 11.0), "", 0.8);
        let c = Detection::new(BoundingBox::new(1.0, 1.0, 11.0, 11.0), "", 0.7);
        let kept = non_max_suppression(vec![(0, b), (0, a), (1, c)], 0.45, 10);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].1.confidence, 0.9);
        assert_eq!(kept[1].0, 1);
    }
}
