//! Fusion engine: one robust Z-distance per detection.
//!
//! For every detection the calibrated map is sampled inside the bounding box,
//! eroded by a margin so background pixels at the box edges are left out, and
//! reduced with a robust statistic. The spread of the same samples is reported
//! as the uncertainty. Detections whose box holds no samples are skipped and
//! the rest of the batch carries on.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibratedDepthMap;
use crate::depth::{DepthMap, PixelRegion};
use crate::detect::{BoundingBox, Detection};
use crate::error::{PipelineError, PipelineResult};
use crate::geometry::{back_project, CameraPoint};
use crate::stats;

pub const DEFAULT_MARGIN: f64 = 0.10;
pub const DEFAULT_TRIM_FRACTION: f64 = 0.10;

/// Point statistic used to collapse a region into one depth.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregate {
    Median,
    TrimmedMean { fraction: f64 },
}

impl Aggregate {
    fn apply(&self, sorted: &[f64]) -> Option<f64> {
        match *self {
            Aggregate::Median => stats::median(sorted),
            Aggregate::TrimmedMean { fraction } => stats::trimmed_mean(sorted, fraction),
        }
    }
}

/// Spread measure reported alongside the point estimate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyMeasure {
    InterquartileRange,
    StdDev,
}

impl UncertaintyMeasure {
    fn apply(&self, sorted: &[f64]) -> Option<f64> {
        match self {
            UncertaintyMeasure::InterquartileRange => stats::interquartile_range(sorted),
            UncertaintyMeasure::StdDev => stats::std_dev(sorted),
        }
    }
}

/// Which pixels ended up being sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Eroded,
    /// Erosion left nothing; the unmodified box was used.
    FullBox,
}

/// How a region of a depth map is reduced to a single value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionSampling {
    /// Fraction of box width/height removed from each side, 0..0.5.
    pub margin: f64,
    pub aggregate: Aggregate,
}

impl Default for RegionSampling {
    fn default() -> Self {
        Self {
            margin: DEFAULT_MARGIN,
            aggregate: Aggregate::Median,
        }
    }
}

/// Samples drawn from one detection's box.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionSample {
    /// Finite samples, ascending.
    pub sorted: Vec<f64>,
    pub region: PixelRegion,
    pub kind: RegionKind,
}

impl RegionSampling {
    /// Collect samples for `bbox`, falling back to the full box when erosion
    /// empties it. `None` when both regions are empty.
    pub fn sample(&self, map: &DepthMap, bbox: &BoundingBox) -> Option<RegionSample> {
        let eroded = eroded_region(bbox, self.margin, map.width(), map.height());
        let sorted = stats::sorted_samples(&map.region_values(&eroded));
        if !sorted.is_empty() {
            return Some(RegionSample {
                sorted,
                region: eroded,
                kind: RegionKind::Eroded,
            });
        }
        let full = covering_region(bbox, map.width(), map.height());
        let sorted = stats::sorted_samples(&map.region_values(&full));
        if sorted.is_empty() {
            return None;
        }
        Some(RegionSample {
            sorted,
            region: full,
            kind: RegionKind::FullBox,
        })
    }

    /// Aggregate value for `bbox`, or `EmptyRegion` tagged with `index`.
    pub fn aggregate_box(
        &self,
        map: &DepthMap,
        bbox: &BoundingBox,
        index: usize,
    ) -> PipelineResult<f64> {
        self.sample(map, bbox)
            .and_then(|s| self.aggregate.apply(&s.sorted))
            .ok_or(PipelineError::EmptyRegion { index })
    }
}

/// Every pixel the box touches, clipped to the map.
fn covering_region(bbox: &BoundingBox, width: u32, height: u32) -> PixelRegion {
    PixelRegion {
        x0: clip(bbox.x_min.floor(), width),
        y0: clip(bbox.y_min.floor(), height),
        x1: clip(bbox.x_max.ceil(), width),
        y1: clip(bbox.y_max.ceil(), height),
    }
}

/// Pixels fully inside the box after shrinking each side by `margin`.
fn eroded_region(bbox: &BoundingBox, margin: f64, width: u32, height: u32) -> PixelRegion {
    let margin = margin.clamp(0.0, 0.5) as f32;
    let dx = bbox.width() * margin;
    let dy = bbox.height() * margin;
    PixelRegion {
        x0: clip((bbox.x_min + dx).ceil(), width),
        y0: clip((bbox.y_min + dy).ceil(), height),
        x1: clip((bbox.x_max - dx).floor(), width),
        y1: clip((bbox.y_max - dy).floor(), height),
    }
}

fn clip(v: f32, limit: u32) -> usize {
    if v.is_nan() || v <= 0.0 {
        0
    } else {
        (v as usize).min(limit as usize)
    }
}

/// Sampling settings plus the uncertainty measure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub sampling: RegionSampling,
    pub uncertainty: UncertaintyMeasure,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            sampling: RegionSampling::default(),
            uncertainty: UncertaintyMeasure::InterquartileRange,
        }
    }
}

/// How an estimate was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingMethod {
    pub aggregate: Aggregate,
    pub uncertainty: UncertaintyMeasure,
    pub region: RegionKind,
}

/// Metric distance for one detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistanceEstimate {
    /// Position of the detection in the fused batch.
    pub index: usize,
    pub detection: Detection,
    /// Distance along the optical axis, meters.
    pub z_m: f64,
    pub uncertainty_m: f64,
    pub method: SamplingMethod,
    pub sample_count: usize,
    /// Box centre back-projected to `z_m`.
    pub position: Option<CameraPoint>,
}

/// Detection the engine could not place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedDetection {
    pub index: usize,
    pub detection: Detection,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionReport {
    /// In input order.
    pub estimates: Vec<DistanceEstimate>,
    pub skipped: Vec<SkippedDetection>,
}

/// Stateless fusion engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Estimate one detection.
    pub fn estimate(
        &self,
        index: usize,
        detection: &Detection,
        calibrated: &CalibratedDepthMap,
    ) -> PipelineResult<DistanceEstimate> {
        let sampling = &self.config.sampling;
        let sample = sampling
            .sample(calibrated.depth(), &detection.bbox)
            .ok_or(PipelineError::EmptyRegion { index })?;
        let z_m = sampling
            .aggregate
            .apply(&sample.sorted)
            .ok_or(PipelineError::EmptyRegion { index })?;
        let uncertainty_m = self
            .config
            .uncertainty
            .apply(&sample.sorted)
            .unwrap_or(0.0);

        let (u, v) = detection.bbox.center();
        let position = back_project(u as f64, v as f64, z_m, calibrated.intrinsics()).ok();

        Ok(DistanceEstimate {
            index,
            detection: detection.clone(),
            z_m,
            uncertainty_m,
            method: SamplingMethod {
                aggregate: sampling.aggregate,
                uncertainty: self.config.uncertainty,
                region: sample.kind,
            },
            sample_count: sample.sorted.len(),
            position,
        })
    }

    /// Estimate every detection, preserving order and skipping empty regions.
    pub fn fuse(&self, detections: &[Detection], calibrated: &CalibratedDepthMap) -> FusionReport {
        let mut report = FusionReport::default();
        for (index, detection) in detections.iter().enumerate() {
            match self.estimate(index, detection, calibrated) {
                Ok(estimate) => report.estimates.push(estimate),
                Err(err) => report.skipped.push(SkippedDetection {
                    index,
                    detection: detection.clone(),
                    reason: err.to_string(),
                }),
            }
        }
        if !report.skipped.is_empty() {
            let indices: Vec<usize> = report.skipped.iter().map(|s| s.index).collect();
            log::warn!(
                "fusion: skipped {} detection(s) with empty depth regions: {:?}",
                indices.len(),
                indices
            );
        }
        report
    }
}

/// Fuse with the default configuration (median, 10 % margin, IQR).
pub fn fuse(detections: &[Detection], calibrated: &CalibratedDepthMap) -> FusionReport {
    FusionEngine::default().fuse(detections, calibrated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{calibrate, CalibrationParams};
    use crate::frame::CameraIntrinsics;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(1000.0, 1000.0, 50.0, 50.0)
    }

    fn identity(map: DepthMap) -> CalibratedDepthMap {
        calibrate(
            &map,
            Some(&intrinsics()),
            &CalibrationParams::Affine {
                scale: 1.0,
                offset: 0.0,
            },
            &[],
        )
        .unwrap()
    }

    fn det(x0: f32, y0: f32, x1: f32, y1: f32) -> Detection {
        Detection::new(BoundingBox::new(x0, y0, x1, y1), "drone", 0.9)
    }

    #[test]
    fn erosion_excludes_background_ring() {
        // 20x20 box: object at depth 10 in the centre, background at 50 on a 2 px ring.
        let map = DepthMap::from_fn(40, 40, |x, y| {
            if (12..28).contains(&x) && (12..28).contains(&y) {
                10.0
            } else {
                50.0
            }
        });
        let calibrated = identity(map);
        let report = fuse(&[det(10.0, 10.0, 30.0, 30.0)], &calibrated);

        let est = &report.estimates[0];
        assert_eq!(est.z_m, 10.0);
        assert_eq!(est.uncertainty_m, 0.0);
        assert_eq!(est.method.region, RegionKind::Eroded);
        assert_eq!(est.sample_count, 16 * 16);
    }

    #[test]
    fn median_resists_outliers_where_mean_does_not() {
        let map = DepthMap::from_fn(10, 10, |x, _| if x == 0 { 1000.0 } else { 5.0 });
        let calibrated = identity(map);
        let engine = FusionEngine::new(FusionConfig {
            sampling: RegionSampling {
                margin: 0.0,
                aggregate: Aggregate::Median,
            },
            uncertainty: UncertaintyMeasure::StdDev,
        });
        let est = engine
            .estimate(0, &det(0.0, 0.0, 10.0, 10.0), &calibrated)
            .unwrap();
        assert_eq!(est.z_m, 5.0);
        assert!(est.uncertainty_m > 100.0);
    }

    #[test]
    fn thin_box_falls_back_to_full_region() {
        let calibrated = identity(DepthMap::filled(10, 10, 3.0));
        // One pixel wide: inward rounding after erosion leaves no column.
        let est = FusionEngine::default()
            .estimate(0, &det(4.0, 2.0, 5.0, 8.0), &calibrated)
            .unwrap();
        assert_eq!(est.method.region, RegionKind::FullBox);
        assert_eq!(est.sample_count, 6);
        assert_eq!(est.z_m, 3.0);
    }

    #[test]
    fn box_outside_map_is_skipped() {
        let calibrated = identity(DepthMap::filled(10, 10, 3.0));
        let dets = vec![det(50.0, 50.0, 60.0, 60.0), det(0.0, 0.0, 10.0, 10.0)];
        let report = fuse(&dets, &calibrated);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 0);
        assert_eq!(report.estimates.len(), 1);
        assert_eq!(report.estimates[0].index, 1);
    }

    #[test]
    fn trimmed_mean_aggregate() {
        let map = DepthMap::from_fn(10, 1, |x, _| x as f32 + 1.0);
        let calibrated = identity(map);
        let engine = FusionEngine::new(FusionConfig {
            sampling: RegionSampling {
                margin: 0.0,
                aggregate: Aggregate::TrimmedMean { fraction: 0.1 },
            },
            uncertainty: UncertaintyMeasure::InterquartileRange,
        });
        let est = engine
            .estimate(0, &det(0.0, 0.0, 10.0, 1.0), &calibrated)
            .unwrap();
        // Drops 1 and 10, mean of 2..=9.
        assert_eq!(est.z_m, 5.5);
    }

    #[test]
    fn position_back_projects_box_centre() {
        let calibrated = identity(DepthMap::filled(100, 100, 20.0));
        let est = FusionEngine::default()
            .estimate(0, &det(40.0, 40.0, 60.0, 60.0), &calibrated)
            .unwrap();
        let p = est.position.unwrap();
        assert_eq!(p.z, 20.0);
        assert!(p.y.abs() < 1e-12);
        assert!(p.x.abs() < 1e-12);
    }
}
