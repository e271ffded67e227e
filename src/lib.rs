//! Monocular drone Z-distance estimation.
//!
//! A single RGB frame goes through an object detector and a monocular depth
//! model, run concurrently. The relative depth map is calibrated to meters,
//! then the fusion engine reduces the calibrated depth inside each detection
//! box to one robust distance with an uncertainty.
//!
//! # Module Structure
//!
//! - `frame`: immutable `Frame` and `CameraIntrinsics`
//! - `detect`: `Detector` trait and backends (synthetic, fixed, tract YOLO)
//! - `depth`: `DepthEstimator` trait, `DepthMap`, backends (gradient, tract)
//! - `calibration`: relative-to-metric affine models, reference objects,
//!   ground-truth fitting
//! - `fusion`: per-detection robust aggregation
//! - `geometry`: pinhole back-projection
//! - `session`: model lifetime and per-frame orchestration
//! - `ingest`, `output`, `config`: frame sources, report rendering, settings

pub mod calibration;
pub mod config;
pub mod depth;
pub mod detect;
pub mod error;
pub mod frame;
pub mod fusion;
pub mod geometry;
pub mod ingest;
pub mod output;
pub mod session;
pub mod stats;
#[cfg(feature = "backend-tract")]
mod tensor;

pub use calibration::{
    calibrate, fit_affine, fit_scale, AffineCalibration, CalibratedDepthMap, CalibrationParams,
    DepthCalibrator, ReferenceObject, MIN_METRIC_DEPTH_M,
};
pub use config::ZdistConfig;
pub use depth::{DepthEstimator, DepthMap, GradientDepthEstimator};
pub use detect::{BoundingBox, Detection, Detector, FixedDetector, SyntheticDroneDetector};
pub use error::{PipelineError, PipelineResult};
pub use frame::{CameraIntrinsics, Frame};
pub use fusion::{
    fuse, Aggregate, DistanceEstimate, FusionConfig, FusionEngine, FusionReport, RegionKind,
    RegionSampling, UncertaintyMeasure,
};
pub use geometry::{back_project, CameraPoint};
pub use ingest::{FrameSource, SourceConfig};
pub use output::{render_text, write_report, OutputFormat};
pub use session::{FrameReport, ScaleFit, Session, SessionOptions};
