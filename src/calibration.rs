//! Depth calibration: relative depth to meters.
//!
//! Monocular models only get the ordering of depths right, so every map goes
//! through `metric = scale * raw + offset`. The affine pair is either fixed
//! (fit offline against ground-truth distances with `fit_scale` or
//! `fit_affine`) or solved per frame from reference objects of known height,
//! using the pinhole relation `Z_ref = f * S / H`.
//!
//! Calibrated values never drop below `MIN_METRIC_DEPTH_M`.

use serde::{Deserialize, Serialize};

use crate::depth::DepthMap;
use crate::detect::Detection;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::CameraIntrinsics;
use crate::fusion::RegionSampling;
use crate::geometry::range_from_known_height;

/// Smallest metric depth a calibrated map may hold, meters.
pub const MIN_METRIC_DEPTH_M: f32 = 1e-3;

/// `metric = scale * raw + offset`, scale strictly positive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffineCalibration {
    pub scale: f64,
    pub offset: f64,
}

impl AffineCalibration {
    pub fn new(scale: f64, offset: f64) -> PipelineResult<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(PipelineError::Calibration(format!(
                "scale must be positive and finite, got {}",
                scale
            )));
        }
        if !offset.is_finite() {
            return Err(PipelineError::Calibration(format!(
                "offset must be finite, got {}",
                offset
            )));
        }
        Ok(Self { scale, offset })
    }

    /// Metric depth for one raw value.
    ///
    /// NaN and anything below the epsilon floor map to `MIN_METRIC_DEPTH_M`;
    /// `+inf` and values past the `f32` range saturate at `f32::MAX`, so the
    /// result is always finite and ordering is preserved.
    pub fn apply(&self, raw: f32) -> f32 {
        let metric = self.scale * raw as f64 + self.offset;
        if metric.is_nan() || metric < MIN_METRIC_DEPTH_M as f64 {
            MIN_METRIC_DEPTH_M
        } else if metric >= f32::MAX as f64 {
            f32::MAX
        } else {
            metric as f32
        }
    }
}

/// Reference object of known physical height visible in the frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceObject {
    /// Real-world height `S`, meters.
    pub height_m: f64,
    /// Only detections with this label count as references.
    pub label: Option<String>,
    /// Offset held fixed while solving for scale.
    #[serde(default)]
    pub offset: f64,
}

/// Where the affine model comes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CalibrationParams {
    Affine { scale: f64, offset: f64 },
    ReferenceObject(ReferenceObject),
}

/// One reference detection used to solve for scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReferenceSample {
    pub index: usize,
    pub raw_depth: f64,
    pub z_ref_m: f64,
}

/// Depth map in meters together with the model and camera that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibratedDepthMap {
    depth: DepthMap,
    intrinsics: CameraIntrinsics,
    model: AffineCalibration,
}

impl CalibratedDepthMap {
    pub fn depth(&self) -> &DepthMap {
        &self.depth
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    pub fn model(&self) -> &AffineCalibration {
        &self.model
    }

    pub fn width(&self) -> u32 {
        self.depth.width()
    }

    pub fn height(&self) -> u32 {
        self.depth.height()
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        self.depth.get(x, y)
    }
}

/// Calibration parameters plus the region sampling used for reference depths.
///
/// Reference depths are sampled exactly the way the fusion engine samples
/// distances, so a reference detection fuses back to its own `Z_ref`.
#[derive(Clone, Debug)]
pub struct DepthCalibrator {
    params: CalibrationParams,
    sampling: RegionSampling,
}

impl DepthCalibrator {
    pub fn new(params: CalibrationParams, sampling: RegionSampling) -> Self {
        Self { params, sampling }
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Resolve the affine model for this frame.
    pub fn resolve(
        &self,
        depth: &DepthMap,
        intrinsics: &CameraIntrinsics,
        detections: &[Detection],
    ) -> PipelineResult<AffineCalibration> {
        match &self.params {
            CalibrationParams::Affine { scale, offset } => AffineCalibration::new(*scale, *offset),
            CalibrationParams::ReferenceObject(reference) => {
                let samples = self.reference_samples(depth, intrinsics, reference, detections)?;
                let model = solve_reference_scale(&samples, reference.offset)?;
                log::debug!(
                    "calibration: scale {:.6} from {} reference detection(s)",
                    model.scale,
                    samples.len()
                );
                Ok(model)
            }
        }
    }

    /// Reference detections that yield a usable `(raw depth, Z_ref)` pair.
    pub fn reference_samples(
        &self,
        depth: &DepthMap,
        intrinsics: &CameraIntrinsics,
        reference: &ReferenceObject,
        detections: &[Detection],
    ) -> PipelineResult<Vec<ReferenceSample>> {
        if !reference.height_m.is_finite() || reference.height_m <= 0.0 {
            return Err(PipelineError::Calibration(format!(
                "reference height must be positive, got {}",
                reference.height_m
            )));
        }
        let samples = detections
            .iter()
            .enumerate()
            .filter(|(_, det)| {
                reference
                    .label
                    .as_deref()
                    .map_or(true, |label| det.label == label)
            })
            .filter_map(|(index, det)| {
                let z_ref_m = range_from_known_height(
                    intrinsics.fy,
                    reference.height_m,
                    det.bbox.height() as f64,
                )?;
                let raw_depth = self.sampling.aggregate_box(depth, &det.bbox, index).ok()?;
                Some(ReferenceSample {
                    index,
                    raw_depth,
                    z_ref_m,
                })
            })
            .collect::<Vec<_>>();
        if samples.is_empty() {
            return Err(PipelineError::Calibration(
                "no usable reference detection in frame and no fixed affine parameters".to_string(),
            ));
        }
        Ok(samples)
    }

    /// Validate intrinsics, resolve the model and convert the map.
    pub fn calibrate(
        &self,
        depth: &DepthMap,
        intrinsics: Option<&CameraIntrinsics>,
        detections: &[Detection],
    ) -> PipelineResult<CalibratedDepthMap> {
        let intrinsics = intrinsics.ok_or_else(|| {
            PipelineError::InvalidIntrinsics("camera intrinsics are missing".to_string())
        })?;
        intrinsics.validate()?;
        let model = self.resolve(depth, intrinsics, detections)?;
        Ok(CalibratedDepthMap {
            depth: depth.map_values(|raw| model.apply(raw)),
            intrinsics: *intrinsics,
            model,
        })
    }
}

/// Calibrate with the default region sampling (median, 10 % margin).
pub fn calibrate(
    depth: &DepthMap,
    intrinsics: Option<&CameraIntrinsics>,
    params: &CalibrationParams,
    detections: &[Detection],
) -> PipelineResult<CalibratedDepthMap> {
    DepthCalibrator::new(params.clone(), RegionSampling::default()).calibrate(
        depth,
        intrinsics,
        detections,
    )
}

/// Least squares for scale with the offset held fixed.
fn solve_reference_scale(
    samples: &[ReferenceSample],
    offset: f64,
) -> PipelineResult<AffineCalibration> {
    let (num, den) = samples.iter().fold((0.0, 0.0), |(num, den), s| {
        (
            num + s.raw_depth * (s.z_ref_m - offset),
            den + s.raw_depth * s.raw_depth,
        )
    });
    if den == 0.0 {
        return Err(PipelineError::Calibration(
            "relative depth at every reference detection is zero".to_string(),
        ));
    }
    AffineCalibration::new(num / den, offset)
}

fn check_pairs(relative_depths: &[f64], true_distances: &[f64]) -> PipelineResult<()> {
    if relative_depths.is_empty() || true_distances.is_empty() {
        return Err(PipelineError::Calibration(
            "calibration data is empty".to_string(),
        ));
    }
    if relative_depths.len() != true_distances.len() {
        return Err(PipelineError::Calibration(format!(
            "mismatched calibration data lengths: {} depths, {} distances",
            relative_depths.len(),
            true_distances.len()
        )));
    }
    Ok(())
}

/// Fit `Z ≈ s * d` through the origin: `s = Σ d z / Σ d²`.
pub fn fit_scale(
    relative_depths: &[f64],
    true_distances: &[f64],
) -> PipelineResult<AffineCalibration> {
    check_pairs(relative_depths, true_distances)?;
    let num: f64 = relative_depths
        .iter()
        .zip(true_distances)
        .map(|(d, z)| d * z)
        .sum();
    let den: f64 = relative_depths.iter().map(|d| d * d).sum();
    if den == 0.0 {
        return Err(PipelineError::Calibration(
            "relative depth values are all zero".to_string(),
        ));
    }
    AffineCalibration::new(num / den, 0.0)
}

/// Fit `Z ≈ s * d + t` by ordinary least squares.
pub fn fit_affine(
    relative_depths: &[f64],
    true_distances: &[f64],
) -> PipelineResult<AffineCalibration> {
    check_pairs(relative_depths, true_distances)?;
    let n = relative_depths.len() as f64;
    let mean_d = relative_depths.iter().sum::<f64>() / n;
    let mean_z = true_distances.iter().sum::<f64>() / n;
    let (cov, var) = relative_depths
        .iter()
        .zip(true_distances)
        .fold((0.0, 0.0), |(cov, var), (d, z)| {
            (cov + (d - mean_d) * (z - mean_z), var + (d - mean_d) * (d - mean_d))
        });
    if var == 0.0 {
        return Err(PipelineError::Calibration(
            "affine fit needs at least two distinct relative depths".to_string(),
        ));
    }
    let scale = cov / var;
    AffineCalibration::new(scale, mean_z - scale * mean_d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn k() -> CameraIntrinsics {
        CameraIntrinsics::new(1000.0, 1000.0, 50.0, 50.0)
    }

    fn affine(scale: f64, offset: f64) -> CalibrationParams {
        CalibrationParams::Affine { scale, offset }
    }

    #[test]
    fn constant_map_scales_elementwise() {
        let map = DepthMap::filled(100, 100, 5.0);
        let cal = calibrate(&map, Some(&k()), &affine(2.0, 1.0), &[]).unwrap();
        assert!(cal.depth().values().iter().all(|&v| v == 11.0));
        assert_eq!(cal.model(), &AffineCalibration { scale: 2.0, offset: 1.0 });
    }

    #[test]
    fn negative_and_zero_results_clamp_to_epsilon() {
        let zeros = DepthMap::filled(4, 4, 0.0);
        let cal = calibrate(&zeros, Some(&k()), &affine(1.0, 0.0), &[]).unwrap();
        assert!(cal.depth().values().iter().all(|&v| v == MIN_METRIC_DEPTH_M));

        let negatives = DepthMap::filled(4, 4, -3.0);
        let cal = calibrate(&negatives, Some(&k()), &affine(1.0, 0.5), &[]).unwrap();
        assert!(cal.depth().values().iter().all(|&v| v == MIN_METRIC_DEPTH_M));

        let nan = DepthMap::filled(1, 1, f32::NAN);
        let cal = calibrate(&nan, Some(&k()), &affine(1.0, 0.0), &[]).unwrap();
        assert_eq!(cal.get(0, 0), Some(MIN_METRIC_DEPTH_M));
    }

    #[test]
    fn infinite_and_overflowing_results_saturate() {
        let inf = DepthMap::filled(10, 10, f32::INFINITY);
        let cal = calibrate(&inf, Some(&k()), &affine(1.0, 0.0), &[]).unwrap();
        assert!(cal.depth().values().iter().all(|&v| v == f32::MAX));

        let huge = DepthMap::filled(2, 2, 1e38);
        let cal = calibrate(&huge, Some(&k()), &affine(10.0, 0.0), &[]).unwrap();
        assert_eq!(cal.get(1, 1), Some(f32::MAX));

        let neg_inf = DepthMap::filled(1, 1, f32::NEG_INFINITY);
        let cal = calibrate(&neg_inf, Some(&k()), &affine(1.0, 0.0), &[]).unwrap();
        assert_eq!(cal.get(0, 0), Some(MIN_METRIC_DEPTH_M));

        // Saturated pixels still count as samples.
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), "drone", 0.9);
        let cal = calibrate(&inf, Some(&k()), &affine(1.0, 0.0), &[]).unwrap();
        let report = crate::fusion::fuse(&[det], &cal);
        assert!(report.skipped.is_empty());
        assert_eq!(report.estimates[0].z_m, f32::MAX as f64);
    }

    #[test]
    fn missing_or_bad_intrinsics_fail() {
        let map = DepthMap::filled(2, 2, 1.0);
        let err = calibrate(&map, None, &affine(1.0, 0.0), &[]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidIntrinsics(_)));

        let bad = CameraIntrinsics::new(-5.0, 10.0, 0.0, 0.0);
        let err = calibrate(&map, Some(&bad), &affine(1.0, 0.0), &[]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidIntrinsics(_)));
    }

    #[test]
    fn non_positive_fixed_scale_is_rejected() {
        let map = DepthMap::filled(2, 2, 1.0);
        let err = calibrate(&map, Some(&k()), &affine(0.0, 1.0), &[]).unwrap_err();
        assert!(matches!(err, PipelineError::Calibration(_)));
    }

    #[test]
    fn reference_mode_without_reference_fails() {
        let map = DepthMap::filled(10, 10, 1.0);
        let params = CalibrationParams::ReferenceObject(ReferenceObject {
            height_m: 0.5,
            label: Some("drone".into()),
            offset: 0.0,
        });
        let other = Detection::new(BoundingBox::new(0.0, 0.0, 5.0, 5.0), "bird", 0.9);
        for dets in [vec![], vec![other]] {
            let err = calibrate(&map, Some(&k()), &params, &dets).unwrap_err();
            assert!(matches!(err, PipelineError::Calibration(_)));
        }
    }

    #[test]
    fn reference_scale_averages_multiple_references() {
        // Two references at raw depth 1 and 2 whose pinhole ranges are 10 m and 20 m.
        let map = DepthMap::from_fn(200, 100, |x, _| if x < 100 { 1.0 } else { 2.0 });
        let dets = vec![
            Detection::new(BoundingBox::new(10.0, 0.0, 60.0, 50.0), "drone", 0.9),
            Detection::new(BoundingBox::new(110.0, 0.0, 135.0, 25.0), "drone", 0.8),
        ];
        let params = CalibrationParams::ReferenceObject(ReferenceObject {
            height_m: 0.5,
            label: None,
            offset: 0.0,
        });
        let cal = calibrate(&map, Some(&k()), &params, &dets).unwrap();
        assert!((cal.model().scale - 10.0).abs() < 1e-9);
    }

    #[test]
    fn fit_scale_through_origin() {
        let d = [1.0, 2.0, 3.0];
        let z = [2.0, 4.0, 6.0];
        assert_eq!(fit_scale(&d, &z).unwrap().scale, 2.0);
        assert!(fit_scale(&[], &[]).is_err());
        assert!(fit_scale(&[1.0], &[1.0, 2.0]).is_err());
        assert!(fit_scale(&[0.0, 0.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn fit_affine_recovers_offset() {
        let d = [1.0, 2.0, 4.0];
        let z: Vec<f64> = d.iter().map(|v| 3.0 * v + 7.0).collect();
        let model = fit_affine(&d, &z).unwrap();
        assert!((model.scale - 3.0).abs() < 1e-12);
        assert!((model.offset - 7.0).abs() < 1e-12);
        assert!(fit_affine(&[2.0, 2.0], &[1.0, 5.0]).is_err());
    }
}
