pub mod gradient;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use gradient::GradientDepthEstimator;

#[cfg(feature = "backend-tract")]
pub use tract::{DepthOutputKind, TractDepthEstimator};
