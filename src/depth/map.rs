use crate::error::{PipelineError, PipelineResult};

/// Dense row-major grid of relative depth values.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)` inside a map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRegion {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl PixelRegion {
    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    pub fn pixel_count(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.x1 - self.x0) * (self.y1 - self.y0)
        }
    }
}

impl DepthMap {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> PipelineResult<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(PipelineError::ModelInference(format!(
                "depth map {}x{} needs {} values, got {}",
                width,
                height,
                expected,
                values.len()
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    /// Map with every pixel set to `value`.
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            values: vec![value; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let mut values = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                values.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            values,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.values[y as usize * self.width as usize + x as usize])
    }

    /// Apply `f` to every value, keeping the shape.
    pub fn map_values(&self, f: impl Fn(f32) -> f32) -> DepthMap {
        DepthMap {
            width: self.width,
            height: self.height,
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Finite values inside `region`, row-major.
    pub fn region_values(&self, region: &PixelRegion) -> Vec<f32> {
        let w = self.width as usize;
        let x1 = region.x1.min(w);
        let y1 = region.y1.min(self.height as usize);
        let mut out = Vec::with_capacity(region.pixel_count());
        for y in region.y0..y1 {
            let row = &self.values[y * w..(y + 1) * w];
            if region.x0 < x1 {
                out.extend(row[region.x0..x1].iter().copied().filter(|v| v.is_finite()));
            }
        }
        out
    }

    /// Bilinear resample to `width x height` using pixel-centre alignment.
    pub fn resize_bilinear(&self, width: u32, height: u32) -> PipelineResult<DepthMap> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::ModelInference(
                "cannot resample an empty depth map".to_string(),
            ));
        }
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        let sx = self.width as f32 / width.max(1) as f32;
        let sy = self.height as f32 / height.max(1) as f32;
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let src_w = self.width as usize;

        Ok(DepthMap::from_fn(width, height, |x, y| {
            let fx = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, max_x);
            let fy = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, max_y);
            let x0 = fx.floor() as usize;
            let y0 = fy.floor() as usize;
            let x1 = (x0 + 1).min(self.width as usize - 1);
            let y1 = (y0 + 1).min(self.height as usize - 1);
            let tx = fx - x0 as f32;
            let ty = fy - y0 as f32;

            let v00 = self.values[y0 * src_w + x0];
            let v10 = self.values[y0 * src_w + x1];
            let v01 = self.values[y1 * src_w + x0];
            let v11 = self.values[y1 * src_w + x1];
            let top = v00 + (v10 - v00) * tx;
            let bottom = v01 + (v11 - v01) * tx;
            top + (bottom - top) * ty
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_value_count() {
        assert!(DepthMap::new(2, 2, vec![1.0; 3]).is_err());
        assert!(DepthMap::new(2, 2, vec![1.0; 4]).is_ok());
    }

    #[test]
    fn region_values_are_clipped_and_skip_non_finite() {
        let mut values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        values[5] = f32::NAN;
        let map = DepthMap::new(4, 4, values).unwrap();
        let region = PixelRegion {
            x0: 1,
            y0: 1,
            x1: 10,
            y1: 3,
        };
        assert_eq!(map.region_values(&region), vec![6.0, 7.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn resize_of_constant_map_stays_constant() {
        let map = DepthMap::filled(4, 3, 2.5);
        let up = map.resize_bilinear(9, 7).unwrap();
        assert_eq!(up.width(), 9);
        assert_eq!(up.height(), 7);
        assert!(up.values().iter().all(|&v| (v - 2.5).abs() < 1e-6));
    }

    #[test]
    fn resize_interpolates_between_columns() {
        let map = DepthMap::new(2, 1, vec![0.0, 1.0]).unwrap();
        let up = map.resize_bilinear(4, 1).unwrap();
        assert_eq!(up.values(), &[0.0, 0.25, 0.75, 1.0]);
    }

    #[test]
    fn resize_empty_map_fails() {
        let map = DepthMap::filled(0, 0, 1.0);
        assert!(map.resize_bilinear(4, 4).is_err());
    }
}
