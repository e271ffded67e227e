use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::calibration::{CalibrationParams, ReferenceObject};
use crate::depth::{DepthEstimator, GradientDepthEstimator};
use crate::detect::{Detector, SyntheticDroneDetector};
use crate::frame::{CameraIntrinsics, Frame};
use crate::fusion::{
    Aggregate, FusionConfig, RegionSampling, UncertaintyMeasure, DEFAULT_MARGIN,
    DEFAULT_TRIM_FRACTION,
};
use crate::ingest::SourceConfig;
use crate::session::SessionOptions;

const DEFAULT_INPUT: &str = "stub://synthetic";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_FOCAL_PX: f64 = 1000.0;
const DEFAULT_SCALE: f64 = 1.0;
const DEFAULT_DEPTH_INPUT: u32 = 518;
const DEFAULT_YOLO_INPUT: u32 = 640;
const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_DRONE_LABEL: &str = "drone";

#[derive(Debug, Deserialize, Default)]
struct ZdistConfigFile {
    input: Option<String>,
    synthetic: Option<SyntheticConfigFile>,
    camera: Option<CameraConfigFile>,
    calibration: Option<CalibrationConfigFile>,
    fusion: Option<FusionConfigFile>,
    backends: Option<BackendConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SyntheticConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    focal_px: Option<f64>,
    fx: Option<f64>,
    fy: Option<f64>,
    cx: Option<f64>,
    cy: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    mode: Option<String>,
    scale: Option<f64>,
    offset: Option<f64>,
    reference_height_m: Option<f64>,
    reference_label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FusionConfigFile {
    margin: Option<f64>,
    statistic: Option<String>,
    trim_fraction: Option<f64>,
    uncertainty: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    detector: Option<String>,
    depth: Option<String>,
    detector_model: Option<PathBuf>,
    depth_model: Option<PathBuf>,
    depth_input_width: Option<u32>,
    depth_input_height: Option<u32>,
    depth_output: Option<String>,
    yolo_input_size: Option<u32>,
    conf_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    class_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Synthetic,
    TractYolo,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synthetic" | "demo" => Ok(Self::Synthetic),
            "tract-yolo" | "yolo" => Ok(Self::TractYolo),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthKind {
    Gradient,
    Tract,
}

impl FromStr for DepthKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gradient" | "demo" => Ok(Self::Gradient),
            "tract" | "tract-depth" => Ok(Self::Tract),
            other => Err(anyhow!("unknown depth backend '{}'", other)),
        }
    }
}

/// Whether the depth model emits depth or inverse depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthOutput {
    Depth,
    InverseDepth,
}

impl FromStr for DepthOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "depth" => Ok(Self::Depth),
            "inverse_depth" | "inverse-depth" | "disparity" => Ok(Self::InverseDepth),
            other => Err(anyhow!("unknown depth output kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZdistConfig {
    pub input: String,
    pub synthetic: SyntheticSettings,
    pub camera: CameraSettings,
    pub calibration: CalibrationParams,
    pub fusion: FusionConfig,
    pub backends: BackendSettings,
    pub target_label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyntheticSettings {
    pub width: u32,
    pub height: u32,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub fx: Option<f64>,
    pub fy: Option<f64>,
    pub cx: Option<f64>,
    pub cy: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub detector: DetectorKind,
    pub depth: DepthKind,
    pub detector_model: Option<PathBuf>,
    pub depth_model: Option<PathBuf>,
    pub depth_input_width: u32,
    pub depth_input_height: u32,
    pub depth_output: DepthOutput,
    pub yolo_input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub class_names: Vec<String>,
    pub seed: u64,
}

impl CameraSettings {
    /// Intrinsics for a frame of the given size. Principal point defaults to
    /// the image centre.
    pub fn intrinsics_for(&self, width: u32, height: u32) -> Option<CameraIntrinsics> {
        let fx = self.fx?;
        let fy = self.fy.unwrap_or(fx);
        Some(CameraIntrinsics::new(
            fx,
            fy,
            self.cx.unwrap_or(width as f64 / 2.0),
            self.cy.unwrap_or(height as f64 / 2.0),
        ))
    }
}

impl BackendSettings {
    pub fn build_detector(&self) -> Result<Box<dyn Detector>> {
        match self.detector {
            DetectorKind::Synthetic => Ok(Box::new(SyntheticDroneDetector::new(self.seed))),
            DetectorKind::TractYolo => self.build_tract_detector(),
        }
    }

    pub fn build_depth_estimator(&self) -> Result<Box<dyn DepthEstimator>> {
        match self.depth {
            DepthKind::Gradient => Ok(Box::new(GradientDepthEstimator::default())),
            DepthKind::Tract => self.build_tract_depth(),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn build_tract_detector(&self) -> Result<Box<dyn Detector>> {
        use crate::detect::{TractYoloDetector, YoloParams};

        let path = self
            .detector_model
            .as_ref()
            .ok_or_else(|| anyhow!("tract-yolo detector requires backends.detector_model"))?;
        let params = YoloParams {
            input_size: self.yolo_input_size,
            conf_threshold: self.conf_threshold,
            iou_threshold: self.iou_threshold,
            ..YoloParams::default()
        };
        Ok(Box::new(TractYoloDetector::new(
            path,
            params,
            self.class_names.clone(),
        )?))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn build_tract_detector(&self) -> Result<Box<dyn Detector>> {
        Err(anyhow!(
            "tract-yolo detector requires the backend-tract feature"
        ))
    }

    #[cfg(feature = "backend-tract")]
    fn build_tract_depth(&self) -> Result<Box<dyn DepthEstimator>> {
        use crate::depth::{DepthOutputKind, TractDepthEstimator};

        let path = self
            .depth_model
            .as_ref()
            .ok_or_else(|| anyhow!("tract depth backend requires backends.depth_model"))?;
        let kind = match self.depth_output {
            DepthOutput::Depth => DepthOutputKind::Depth,
            DepthOutput::InverseDepth => DepthOutputKind::InverseDepth,
        };
        Ok(Box::new(TractDepthEstimator::new(
            path,
            self.depth_input_width,
            self.depth_input_height,
            kind,
        )?))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn build_tract_depth(&self) -> Result<Box<dyn DepthEstimator>> {
        Err(anyhow!("tract depth backend requires the backend-tract feature"))
    }
}

impl ZdistConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ZDIST_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults only, no file and no environment.
    pub fn defaults() -> Result<Self> {
        let mut cfg = Self::from_file(ZdistConfigFile::default())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ZdistConfigFile) -> Result<Self> {
        let input = file.input.unwrap_or_else(|| DEFAULT_INPUT.to_string());

        let synthetic_file = file.synthetic.unwrap_or_default();
        let synthetic = SyntheticSettings {
            width: synthetic_file.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: synthetic_file.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            seed: synthetic_file.seed.unwrap_or(0),
        };

        let camera_file = file.camera.unwrap_or_default();
        let fx = camera_file
            .fx
            .or(camera_file.focal_px)
            .or(Some(DEFAULT_FOCAL_PX));
        let camera = CameraSettings {
            fx,
            fy: camera_file.fy.or(camera_file.focal_px),
            cx: camera_file.cx,
            cy: camera_file.cy,
        };

        let calibration = calibration_from_file(file.calibration.unwrap_or_default())?;
        let fusion = fusion_from_file(file.fusion.unwrap_or_default())?;

        let backends_file = file.backends.unwrap_or_default();
        let backends = BackendSettings {
            detector: backends_file
                .detector
                .as_deref()
                .map(DetectorKind::from_str)
                .transpose()?
                .unwrap_or(DetectorKind::Synthetic),
            depth: backends_file
                .depth
                .as_deref()
                .map(DepthKind::from_str)
                .transpose()?
                .unwrap_or(DepthKind::Gradient),
            detector_model: backends_file.detector_model,
            depth_model: backends_file.depth_model,
            depth_input_width: backends_file
                .depth_input_width
                .unwrap_or(DEFAULT_DEPTH_INPUT),
            depth_input_height: backends_file
                .depth_input_height
                .unwrap_or(DEFAULT_DEPTH_INPUT),
            depth_output: backends_file
                .depth_output
                .as_deref()
                .map(DepthOutput::from_str)
                .transpose()?
                .unwrap_or(DepthOutput::InverseDepth),
            yolo_input_size: backends_file.yolo_input_size.unwrap_or(DEFAULT_YOLO_INPUT),
            conf_threshold: backends_file
                .conf_threshold
                .unwrap_or(DEFAULT_CONF_THRESHOLD),
            iou_threshold: backends_file.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            class_names: backends_file
                .class_names
                .unwrap_or_else(|| vec![DEFAULT_DRONE_LABEL.to_string()]),
            seed: synthetic.seed,
        };

        let target_label = file.detector.and_then(|d| d.label);

        Ok(Self {
            input,
            synthetic,
            camera,
            calibration,
            fusion,
            backends,
            target_label,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(input) = std::env::var("ZDIST_INPUT") {
            if !input.trim().is_empty() {
                self.input = input;
            }
        }
        if let Some(focal) = env_f64("ZDIST_FOCAL_PX")? {
            self.camera.fx = Some(focal);
            self.camera.fy = Some(focal);
        }
        let scale = env_f64("ZDIST_SCALE")?;
        let offset = env_f64("ZDIST_OFFSET")?;
        if scale.is_some() || offset.is_some() {
            let (cur_scale, cur_offset) = match &self.calibration {
                CalibrationParams::Affine { scale, offset } => (*scale, *offset),
                CalibrationParams::ReferenceObject(r) => {
                    log::warn!(
                        "ZDIST_SCALE/ZDIST_OFFSET override reference-object calibration \
                         ({} m reference); using fixed affine parameters",
                        r.height_m
                    );
                    (DEFAULT_SCALE, r.offset)
                }
            };
            self.calibration = CalibrationParams::Affine {
                scale: scale.unwrap_or(cur_scale),
                offset: offset.unwrap_or(cur_offset),
            };
        }
        if let Some(margin) = env_f64("ZDIST_MARGIN")? {
            self.fusion.sampling.margin = margin;
        }
        if let Ok(kind) = std::env::var("ZDIST_DETECTOR_BACKEND") {
            if !kind.trim().is_empty() {
                self.backends.detector = kind.parse()?;
            }
        }
        if let Ok(kind) = std::env::var("ZDIST_DEPTH_BACKEND") {
            if !kind.trim().is_empty() {
                self.backends.depth = kind.parse()?;
            }
        }
        if let Ok(label) = std::env::var("ZDIST_DRONE_LABEL") {
            if !label.trim().is_empty() {
                self.target_label = Some(label.trim().to_string());
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if let Some(k) = self.camera.intrinsics_for(self.synthetic.width, self.synthetic.height) {
            k.validate().context("camera")?;
        }
        match &self.calibration {
            CalibrationParams::Affine { scale, offset } => {
                crate::calibration::AffineCalibration::new(*scale, *offset)
                    .context("calibration")?;
            }
            CalibrationParams::ReferenceObject(r) => {
                if !(r.height_m.is_finite() && r.height_m > 0.0) {
                    return Err(anyhow!(
                        "calibration.reference_height_m must be positive, got {}",
                        r.height_m
                    ));
                }
            }
        }
        let margin = self.fusion.sampling.margin;
        if !(0.0..0.5).contains(&margin) {
            return Err(anyhow!("fusion.margin must be in [0, 0.5), got {}", margin));
        }
        if let Aggregate::TrimmedMean { fraction } = self.fusion.sampling.aggregate {
            if !(0.0..0.5).contains(&fraction) {
                return Err(anyhow!(
                    "fusion.trim_fraction must be in [0, 0.5), got {}",
                    fraction
                ));
            }
        }
        if self.synthetic.width == 0 || self.synthetic.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        if self.backends.class_names.is_empty() {
            self.backends.class_names = vec![DEFAULT_DRONE_LABEL.to_string()];
        }
        Ok(())
    }

    pub fn session_options(&self, width: u32, height: u32) -> SessionOptions {
        SessionOptions {
            calibration: self.calibration.clone(),
            fusion: self.fusion,
            intrinsics: self.camera.intrinsics_for(width, height),
            target_label: self.target_label.clone(),
        }
    }

    /// Attach intrinsics sized for this frame unless it already carries its
    /// own. Principal point follows each frame's resolution.
    pub fn attach_intrinsics(&self, frame: Frame) -> Frame {
        if frame.intrinsics().is_some() {
            return frame;
        }
        match self.camera.intrinsics_for(frame.width(), frame.height()) {
            Some(k) => frame.with_intrinsics(k),
            None => frame,
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            input: self.input.clone(),
            width: self.synthetic.width,
            height: self.synthetic.height,
            seed: self.synthetic.seed,
        }
    }
}

fn calibration_from_file(file: CalibrationConfigFile) -> Result<CalibrationParams> {
    let mode = file.mode.as_deref().unwrap_or("affine").to_ascii_lowercase();
    match mode.as_str() {
        "affine" => Ok(CalibrationParams::Affine {
            scale: file.scale.unwrap_or(DEFAULT_SCALE),
            offset: file.offset.unwrap_or(0.0),
        }),
        "reference" | "reference_object" => {
            let height_m = file.reference_height_m.ok_or_else(|| {
                anyhow!("calibration.mode = reference requires reference_height_m")
            })?;
            Ok(CalibrationParams::ReferenceObject(ReferenceObject {
                height_m,
                label: file.reference_label,
                offset: file.offset.unwrap_or(0.0),
            }))
        }
        other => Err(anyhow!("unknown calibration mode '{}'", other)),
    }
}

fn fusion_from_file(file: FusionConfigFile) -> Result<FusionConfig> {
    let aggregate = match file
        .statistic
        .as_deref()
        .unwrap_or("median")
        .to_ascii_lowercase()
        .as_str()
    {
        "median" => Aggregate::Median,
        "trimmed_mean" | "trimmed-mean" => Aggregate::TrimmedMean {
            fraction: file.trim_fraction.unwrap_or(DEFAULT_TRIM_FRACTION),
        },
        other => return Err(anyhow!("unknown fusion statistic '{}'", other)),
    };
    let uncertainty = match file
        .uncertainty
        .as_deref()
        .unwrap_or("iqr")
        .to_ascii_lowercase()
        .as_str()
    {
        "iqr" | "interquartile_range" => UncertaintyMeasure::InterquartileRange,
        "std" | "stddev" | "std_dev" => UncertaintyMeasure::StdDev,
        other => return Err(anyhow!("unknown fusion uncertainty '{}'", other)),
    };
    Ok(FusionConfig {
        sampling: RegionSampling {
            margin: file.margin.unwrap_or(DEFAULT_MARGIN),
            aggregate,
        },
        uncertainty,
    })
}

fn env_f64(key: &str) -> Result<Option<f64>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number, got '{}'", key, raw)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<ZdistConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ZdistConfig::defaults().unwrap();
        assert_eq!(cfg.input, DEFAULT_INPUT);
        assert_eq!(cfg.backends.detector, DetectorKind::Synthetic);
        assert_eq!(cfg.backends.depth, DepthKind::Gradient);
        assert_eq!(
            cfg.calibration,
            CalibrationParams::Affine {
                scale: 1.0,
                offset: 0.0
            }
        );
        let k = cfg.camera.intrinsics_for(640, 480).unwrap();
        assert_eq!((k.fx, k.fy, k.cx, k.cy), (1000.0, 1000.0, 320.0, 240.0));
    }

    #[test]
    fn reference_mode_requires_height() {
        let file = CalibrationConfigFile {
            mode: Some("reference".into()),
            ..Default::default()
        };
        assert!(calibration_from_file(file).is_err());
    }

    #[test]
    fn unknown_statistic_is_rejected() {
        let file = FusionConfigFile {
            statistic: Some("mean".into()),
            ..Default::default()
        };
        assert!(fusion_from_file(file).is_err());
    }

    #[test]
    fn backend_kinds_parse() {
        assert_eq!("demo".parse::<DetectorKind>().unwrap(), DetectorKind::Synthetic);
        assert_eq!("YOLO".parse::<DetectorKind>().unwrap(), DetectorKind::TractYolo);
        assert_eq!("tract".parse::<DepthKind>().unwrap(), DepthKind::Tract);
        assert_eq!(
            "disparity".parse::<DepthOutput>().unwrap(),
            DepthOutput::InverseDepth
        );
        assert!("midas".parse::<DepthKind>().is_err());
    }

    #[test]
    fn intrinsics_follow_each_frame_size() {
        let cfg = ZdistConfig::defaults().unwrap();
        let small = cfg.attach_intrinsics(Frame::new(vec![0u8; 4 * 2 * 3], 4, 2).unwrap());
        let large = cfg.attach_intrinsics(Frame::new(vec![0u8; 8 * 6 * 3], 8, 6).unwrap());
        let (ks, kl) = (small.intrinsics().unwrap(), large.intrinsics().unwrap());
        assert_eq!((ks.cx, ks.cy), (2.0, 1.0));
        assert_eq!((kl.cx, kl.cy), (4.0, 3.0));
        assert_eq!(kl.fx, DEFAULT_FOCAL_PX);

        let own = CameraIntrinsics::new(50.0, 50.0, 0.5, 0.5);
        let framed = Frame::new(vec![0u8; 12], 2, 2).unwrap().with_intrinsics(own);
        assert_eq!(cfg.attach_intrinsics(framed).intrinsics(), Some(&own));
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_backends_need_feature() {
        let mut cfg = ZdistConfig::defaults().unwrap();
        cfg.backends.depth = DepthKind::Tract;
        assert!(cfg.backends.build_depth_estimator().is_err());
        assert!(cfg.backends.build_detector().is_ok());
    }
}
