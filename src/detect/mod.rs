mod backend;
pub mod backends;
mod result;

pub use backend::Detector;
pub use backends::{FixedDetector, SyntheticDroneDetector};
#[cfg(feature = "backend-tract")]
pub use backends::{TractYoloDetector, YoloParams};
pub use result::{primary_detection, primary_index, validate_detections, BoundingBox, Detection};
