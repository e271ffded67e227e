//! Frame to model-input conversion shared by the tract backends.

use tract_onnx::prelude::tract_ndarray::Array4;

use crate::frame::{Frame, RGB_CHANNELS};

/// Nearest-neighbour resize into a `[1, 3, H, W]` tensor, scaled to 0..1 and
/// normalised per channel with `(v - mean) / std`.
pub(crate) fn rgb_to_nchw(
    frame: &Frame,
    out_width: u32,
    out_height: u32,
    mean: [f32; 3],
    std: [f32; 3],
) -> Array4<f32> {
    let src_w = frame.width() as usize;
    let src_h = frame.height() as usize;
    let out_w = out_width as usize;
    let out_h = out_height as usize;
    let pixels = frame.pixels();

    Array4::from_shape_fn((1, 3, out_h, out_w), |(_, channel, y, x)| {
        let sx = (x * src_w / out_w).min(src_w.saturating_sub(1));
        let sy = (y * src_h / out_h).min(src_h.saturating_sub(1));
        let idx = (sy * src_w + sx) * RGB_CHANNELS + channel;
        (pixels[idx] as f32 / 255.0 - mean[channel]) / std[channel]
    })
}
