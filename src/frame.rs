//! Frame and camera model.
//!
//! - `Frame`: immutable RGB24 image with optional intrinsics. Pixel bytes are
//!   private; adapters get a read-only slice and nothing else.
//! - `CameraIntrinsics`: pinhole parameters in pixels.
//!
//! A frame is created per inference call and dropped once its report is built.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Bytes per pixel for the only pixel layout the pipeline accepts.
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// CameraIntrinsics
// ----------------------------------------------------------------------------

/// Pinhole camera parameters, all in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Square pixels, principal point at the image centre.
    pub fn from_focal_px(focal_px: f64, width: u32, height: u32) -> Self {
        Self {
            fx: focal_px,
            fy: focal_px,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    /// Derive pixel focal length from the lens focal length and sensor width.
    pub fn from_sensor(
        focal_mm: f64,
        sensor_width_mm: f64,
        width: u32,
        height: u32,
    ) -> PipelineResult<Self> {
        if !sensor_width_mm.is_finite() || sensor_width_mm <= 0.0 {
            return Err(PipelineError::InvalidIntrinsics(format!(
                "sensor width must be positive, got {}",
                sensor_width_mm
            )));
        }
        let focal_px = focal_mm * width as f64 / sensor_width_mm;
        let intrinsics = Self::from_focal_px(focal_px, width, height);
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Focal lengths must be finite and strictly positive.
    pub fn validate(&self) -> PipelineResult<()> {
        for (name, value) in [("fx", self.fx), ("fy", self.fy)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PipelineError::InvalidIntrinsics(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !self.cx.is_finite() || !self.cy.is_finite() {
            return Err(PipelineError::InvalidIntrinsics(
                "principal point must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Immutable RGB frame.
///
/// There is no mutable accessor; once constructed a frame is read-only, which
/// lets detection and depth estimation borrow it from two threads at once.
#[derive(Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    intrinsics: Option<CameraIntrinsics>,
}

impl Frame {
    /// Build an RGB24 frame. Pixel length must equal `width * height * 3`.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> PipelineResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| PipelineError::ModelInference("frame dimensions overflow".into()))?;
        if pixels.len() != expected {
            return Err(PipelineError::ModelInference(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            intrinsics: None,
        })
    }

    /// Attach camera intrinsics. Consumes the frame so it stays immutable after capture.
    pub fn with_intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn intrinsics(&self) -> Option<&CameraIntrinsics> {
        self.intrinsics.as_ref()
    }

    /// Read-only pixel view for adapters.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Check the frame is something a model can consume.
    pub fn ensure_inferable(&self) -> PipelineResult<()> {
        if self.is_empty() {
            return Err(PipelineError::ModelInference(format!(
                "zero-size frame {}x{}",
                self.width, self.height
            )));
        }
        let pixel_count = self.width as usize * self.height as usize;
        if self.pixels.len() != pixel_count * RGB_CHANNELS {
            return Err(PipelineError::ModelInference(format!(
                "frame has {} bytes, not a {}-channel image",
                self.pixels.len(),
                RGB_CHANNELS
            )));
        }
        Ok(())
    }
}
