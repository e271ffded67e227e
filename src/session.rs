//! Processing session: owns the loaded models for its lifetime.
//!
//! A session is opened with a detector, a depth estimator and immutable
//! calibration parameters, warms both models up, and processes frames one at
//! a time. Per frame:
//!
//! 1. detection and depth estimation run concurrently on scoped threads;
//! 2. both are joined before calibration starts;
//! 3. the depth map is calibrated to meters;
//! 4. the fusion engine produces one estimate per detection.
//!
//! Nothing computed for one frame is reused for the next. Calibration
//! parameters live behind an `Arc` and are never mutated after `open`.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::calibration::{
    fit_affine, fit_scale, AffineCalibration, CalibrationParams, DepthCalibrator,
};
use crate::depth::{DepthEstimator, DepthMap};
use crate::detect::{primary_index, validate_detections, Detection, Detector};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{CameraIntrinsics, Frame};
use crate::fusion::{DistanceEstimate, FusionConfig, FusionEngine, SkippedDetection};

/// How ground-truth calibration fits the affine model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFit {
    /// `Z = s * d`.
    #[default]
    ThroughOrigin,
    /// `Z = s * d + t`.
    Affine,
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub calibration: CalibrationParams,
    pub fusion: FusionConfig,
    /// Used for frames that carry no intrinsics of their own.
    pub intrinsics: Option<CameraIntrinsics>,
    /// Label of the target object; `None` accepts every class.
    pub target_label: Option<String>,
}

/// Everything produced for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame_index: u64,
    pub width: u32,
    pub height: u32,
    pub detector: String,
    pub depth_backend: String,
    pub calibration: AffineCalibration,
    pub estimates: Vec<DistanceEstimate>,
    pub skipped: Vec<SkippedDetection>,
    pub elapsed_ms: f64,
}

impl FrameReport {
    /// Estimate for the highest-confidence target detection.
    pub fn primary(&self) -> Option<&DistanceEstimate> {
        self.estimates.iter().fold(None, |best, est| match best {
            Some(b) if b.detection.confidence >= est.detection.confidence => Some(b),
            _ => Some(est),
        })
    }
}

pub struct Session {
    detector: Box<dyn Detector>,
    estimator: Box<dyn DepthEstimator>,
    calibrator: Arc<DepthCalibrator>,
    fusion: FusionEngine,
    intrinsics: Option<CameraIntrinsics>,
    target_label: Option<String>,
    frames_processed: u64,
}

impl Session {
    /// Load and warm up both models.
    pub fn open(
        mut detector: Box<dyn Detector>,
        mut estimator: Box<dyn DepthEstimator>,
        options: SessionOptions,
    ) -> Result<Self> {
        detector
            .warm_up()
            .with_context(|| format!("warming up detector {}", detector.name()))?;
        estimator
            .warm_up()
            .with_context(|| format!("warming up depth estimator {}", estimator.name()))?;
        log::info!(
            "session open: detector={} depth={} calibration={:?}",
            detector.name(),
            estimator.name(),
            options.calibration
        );
        Ok(Self {
            detector,
            estimator,
            calibrator: Arc::new(DepthCalibrator::new(
                options.calibration,
                options.fusion.sampling,
            )),
            fusion: FusionEngine::new(options.fusion),
            intrinsics: options.intrinsics,
            target_label: options.target_label,
            frames_processed: 0,
        })
    }

    /// Read-only handle to the calibration in force for this session.
    pub fn calibrator(&self) -> Arc<DepthCalibrator> {
        Arc::clone(&self.calibrator)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Run detection and depth estimation concurrently and join them.
    fn infer(&mut self, frame: &Frame) -> PipelineResult<(Vec<Detection>, DepthMap)> {
        let detector = &mut self.detector;
        let estimator = &mut self.estimator;

        let (detections, depth) = thread::scope(|scope| {
            let detection_task = scope.spawn(move || detector.detect(frame));
            let depth = estimator.estimate(frame);
            let detections = detection_task
                .join()
                .map_err(|_| PipelineError::ModelInference("detector thread panicked".into()));
            (detections, depth)
        });
        let mut detections = detections?;
        let depth = depth?;

        if let Some(label) = self.target_label.as_deref() {
            detections.retain(|det| det.label == label);
        }
        validate_detections(&detections)?;

        let depth = if depth.width() != frame.width() || depth.height() != frame.height() {
            log::debug!(
                "resampling depth {}x{} to frame {}x{}",
                depth.width(),
                depth.height(),
                frame.width(),
                frame.height()
            );
            depth.resize_bilinear(frame.width(), frame.height())?
        } else {
            depth
        };
        Ok((detections, depth))
    }

    /// Process one frame end to end.
    ///
    /// Calibration and adapter errors abort this frame only; the session stays
    /// usable for the next one.
    pub fn process_frame(&mut self, frame: &Frame) -> PipelineResult<FrameReport> {
        let started = Instant::now();
        let frame_index = self.frames_processed;
        self.frames_processed += 1;

        let (detections, depth) = self.infer(frame)?;
        let intrinsics = frame.intrinsics().or(self.intrinsics.as_ref());
        let calibrated = self.calibrator.calibrate(&depth, intrinsics, &detections)?;
        let fused = self.fusion.fuse(&detections, &calibrated);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        log::debug!(
            "frame {}: {} detection(s), {} estimate(s), {:.1} ms",
            frame_index,
            detections.len(),
            fused.estimates.len(),
            elapsed_ms
        );

        Ok(FrameReport {
            frame_index,
            width: frame.width(),
            height: frame.height(),
            detector: self.detector.name().to_string(),
            depth_backend: self.estimator.name().to_string(),
            calibration: *calibrated.model(),
            estimates: fused.estimates,
            skipped: fused.skipped,
            elapsed_ms,
        })
    }

    /// Relative depth of the primary detection in each frame, paired with the
    /// known distances, then fit.
    pub fn calibrate_from_ground_truth(
        &mut self,
        frames: &[Frame],
        true_distances: &[f64],
        fit: ScaleFit,
    ) -> PipelineResult<AffineCalibration> {
        if frames.len() != true_distances.len() {
            return Err(PipelineError::Calibration(format!(
                "mismatched calibration data lengths: {} frames, {} distances",
                frames.len(),
                true_distances.len()
            )));
        }
        let sampling = self.fusion.config().sampling;
        let mut relative = Vec::with_capacity(frames.len());
        for (i, frame) in frames.iter().enumerate() {
            let (detections, depth) = self.infer(frame)?;
            let index = primary_index(&detections, None).ok_or_else(|| {
                PipelineError::Calibration(format!("no detection in calibration frame {}", i))
            })?;
            let target = &detections[index];
            relative.push(sampling.aggregate_box(&depth, &target.bbox, index)?);
        }
        let model = match fit {
            ScaleFit::ThroughOrigin => fit_scale(&relative, true_distances)?,
            ScaleFit::Affine => fit_affine(&relative, true_distances)?,
        };
        log::info!(
            "ground-truth calibration over {} frame(s): scale={:.6} offset={:.6}",
            relative.len(),
            model.scale,
            model.offset
        );
        Ok(model)
    }

    /// Release the models.
    pub fn close(self) {
        log::info!(
            "session closed after {} frame(s) (detector={}, depth={})",
            self.frames_processed,
            self.detector.name(),
            self.estimator.name()
        );
    }
}
