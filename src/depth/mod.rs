//! Monocular depth estimation.
//!
//! Estimators produce a relative `DepthMap` per frame: values carry no unit,
//! only their ordering is meaningful, and larger means farther. Backends whose
//! model emits inverse depth (disparity) invert it before returning.

mod backend;
pub mod backends;
mod map;

pub use backend::DepthEstimator;
pub use backends::GradientDepthEstimator;
#[cfg(feature = "backend-tract")]
pub use backends::{DepthOutputKind, TractDepthEstimator};
pub use map::{DepthMap, PixelRegion};
