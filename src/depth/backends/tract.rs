#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{Context, Result};
use tract_onnx::prelude::*;

use crate::depth::backend::DepthEstimator;
use crate::depth::map::DepthMap;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::tensor::rgb_to_nchw;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// What the model's output channel encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthOutputKind {
    /// Larger is farther (ZoeDepth-style).
    Depth,
    /// Larger is nearer (MiDaS / Depth Anything disparity). Inverted on output.
    InverseDepth,
}

/// Tract-based relative depth model.
///
/// Input is `[1, 3, H, W]` ImageNet-normalised RGB. Output may be `[1, H, W]`
/// or `[1, 1, H, W]` at any resolution.
pub struct TractDepthEstimator {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    output_kind: DepthOutputKind,
}

impl TractDepthEstimator {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_width: u32,
        input_height: u32,
        output_kind: DepthOutputKind,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
            output_kind,
        })
    }

    fn run_model(&self, frame: &Frame) -> Result<DepthMap> {
        let input = rgb_to_nchw(
            frame,
            self.input_width,
            self.input_height,
            IMAGENET_MEAN,
            IMAGENET_STD,
        );
        let outputs = self
            .model
            .run(tvec!(input.into_tensor().into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .context("model produced no outputs")?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let (h, w) = match shape.as_slice() {
            [1, h, w] | [1, 1, h, w] => (*h, *w),
            other => anyhow::bail!("unexpected depth output shape {:?}", other),
        };
        let values: Vec<f32> = view
            .iter()
            .map(|&v| match self.output_kind {
                DepthOutputKind::Depth => v,
                DepthOutputKind::InverseDepth => 1.0 / v.max(f32::EPSILON),
            })
            .collect();
        Ok(DepthMap::new(w as u32, h as u32, values)?)
    }
}

impl DepthEstimator for TractDepthEstimator {
    fn name(&self) -> &'static str {
        "tract-depth"
    }

    fn estimate(&mut self, frame: &Frame) -> PipelineResult<DepthMap> {
        frame.ensure_inferable()?;
        self.run_model(frame)
            .map_err(|e| PipelineError::ModelInference(format!("{:#}", e)))
    }
}
