use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::SourceConfig;
use crate::frame::Frame;

/// Sky gradient with a small dark blob that drifts between frames.
pub(super) struct SyntheticSource {
    width: u32,
    height: u32,
    rng: StdRng,
}

impl SyntheticSource {
    pub(super) fn new(config: &SourceConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        Ok(Self {
            width: config.width,
            height: config.height,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame> {
        let (w, h) = (self.width as usize, self.height as usize);
        let blob_x = self.rng.gen_range(0.25..0.75) * w as f32;
        let blob_y = self.rng.gen_range(0.20..0.60) * h as f32;
        let radius = (w.min(h) as f32 * 0.03).max(1.0);

        let mut pixels = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            let sky = 200 - (y * 80 / h.max(1)) as u8;
            for x in 0..w {
                let dx = x as f32 - blob_x;
                let dy = y as f32 - blob_y;
                if dx * dx + dy * dy <= radius * radius {
                    pixels.extend_from_slice(&[30, 30, 35]);
                } else {
                    pixels.extend_from_slice(&[sky / 2, sky - 20, sky]);
                }
            }
        }
        Ok(Frame::new(pixels, self.width, self.height)?)
    }
}
