use anyhow::Result;

use crate::depth::map::DepthMap;
use crate::error::PipelineResult;
use crate::frame::Frame;

/// Depth model adapter. One implementation per model family.
///
/// Returns `PipelineError::ModelInference` for frames the model cannot
/// consume (zero size, wrong channel count). The returned map may use the
/// model's native resolution; the session resamples it to the frame.
pub trait DepthEstimator: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Estimate relative depth for a frame.
    fn estimate(&mut self, frame: &Frame) -> PipelineResult<DepthMap>;

    /// Optional warm-up hook, run once when a session opens.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<E: DepthEstimator + ?Sized> DepthEstimator for Box<E> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn estimate(&mut self, frame: &Frame) -> PipelineResult<DepthMap> {
        (**self).estimate(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
