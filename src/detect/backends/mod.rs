pub mod fixed;
pub mod synthetic;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use fixed::FixedDetector;
pub use synthetic::SyntheticDroneDetector;

#[cfg(feature = "backend-tract")]
pub use tract::{TractYoloDetector, YoloParams};
