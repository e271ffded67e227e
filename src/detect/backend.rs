use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detector adapter. One implementation per detector family.
///
/// # Failure contract
///
/// `detect` never aborts the pipeline. An implementation whose model fails to
/// run logs the failure and returns an empty set. Output that is returned is
/// validated by the session; malformed boxes or confidences fail the frame.
///
/// The frame is borrowed read-only. Implementations must not retain pixels
/// beyond the call.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Vec<Detection>;

    /// Optional warm-up hook, run once when a session opens.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
