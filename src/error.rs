use thiserror::Error;

/// Failures raised by the estimation pipeline.
///
/// `InvalidIntrinsics` and `Calibration` are fatal for the frame being
/// processed. `EmptyRegion` is per-detection and is recovered by the fusion
/// engine. `ModelInference` covers adapter failures and aborts the frame only.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("invalid camera intrinsics: {0}")]
    InvalidIntrinsics(String),

    #[error("calibration failed: {0}")]
    Calibration(String),

    #[error("model inference failed: {0}")]
    ModelInference(String),

    #[error("detection {index} has no depth samples inside its bounding box")]
    EmptyRegion { index: usize },
}

impl PipelineError {
    /// True when the error invalidates the whole frame.
    pub fn is_frame_fatal(&self) -> bool {
        !matches!(self, PipelineError::EmptyRegion { .. })
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
