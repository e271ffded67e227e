use crate::depth::backend::DepthEstimator;
use crate::depth::map::DepthMap;
use crate::error::PipelineResult;
use crate::frame::Frame;

/// Demo estimator: a linear ramp in row-major order from `near` at the top-left
/// pixel to `far` at the bottom-right, at frame resolution.
#[derive(Clone, Debug)]
pub struct GradientDepthEstimator {
    near: f32,
    far: f32,
}

impl GradientDepthEstimator {
    pub fn new(near: f32, far: f32) -> Self {
        Self { near, far }
    }
}

impl Default for GradientDepthEstimator {
    fn default() -> Self {
        Self::new(0.5, 2.5)
    }
}

impl DepthEstimator for GradientDepthEstimator {
    fn name(&self) -> &'static str {
        "gradient"
    }

    fn estimate(&mut self, frame: &Frame) -> PipelineResult<DepthMap> {
        frame.ensure_inferable()?;
        let width = frame.width();
        let n = width as usize * frame.height() as usize;
        let step = if n > 1 {
            (self.far - self.near) / (n - 1) as f32
        } else {
            0.0
        };
        Ok(DepthMap::from_fn(width, frame.height(), |x, y| {
            let i = y as usize * width as usize + x as usize;
            self.near + step * i as f32
        }))
    }
}
