//! Pinhole back-projection from image coordinates to the camera frame.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::frame::CameraIntrinsics;

/// Point in camera coordinates, meters. `z` runs along the optical axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl CameraPoint {
    /// Euclidean distance to the camera centre.
    pub fn range_m(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Back-project pixel `(u, v)` observed at axial depth `z`.
pub fn back_project(
    u: f64,
    v: f64,
    z: f64,
    intrinsics: &CameraIntrinsics,
) -> PipelineResult<CameraPoint> {
    if intrinsics.fx == 0.0 || intrinsics.fy == 0.0 {
        return Err(PipelineError::InvalidIntrinsics(
            "fx and fy must be non-zero".to_string(),
        ));
    }
    Ok(CameraPoint {
        x: (u - intrinsics.cx) * z / intrinsics.fx,
        y: (v - intrinsics.cy) * z / intrinsics.fy,
        z,
    })
}

/// Pinhole range from a known object height: `Z = f * S / H`.
pub fn range_from_known_height(focal_px: f64, height_m: f64, height_px: f64) -> Option<f64> {
    if focal_px <= 0.0 || height_m <= 0.0 || height_px <= 0.0 {
        return None;
    }
    let z = focal_px * height_m / height_px;
    z.is_finite().then_some(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_point_projects_onto_axis() {
        let k = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0);
        let p = back_project(320.0, 240.0, 12.0, &k).unwrap();
        assert_eq!(p, CameraPoint { x: 0.0, y: 0.0, z: 12.0 });
        assert_eq!(p.range_m(), 12.0);
    }

    #[test]
    fn off_axis_point_has_lateral_offset() {
        let k = CameraIntrinsics::new(1000.0, 500.0, 0.0, 0.0);
        let p = back_project(100.0, 50.0, 10.0, &k).unwrap();
        assert!((p.x - 1.0).abs() < 1e-12);
        assert!((p.y - 1.0).abs() < 1e-12);
        assert!(p.range_m() > p.z);
    }

    #[test]
    fn zero_focal_length_is_rejected() {
        let k = CameraIntrinsics::new(0.0, 500.0, 0.0, 0.0);
        assert!(matches!(
            back_project(1.0, 1.0, 1.0, &k),
            Err(PipelineError::InvalidIntrinsics(_))
        ));
    }

    #[test]
    fn known_height_range() {
        assert_eq!(range_from_known_height(1000.0, 0.5, 50.0), Some(10.0));
        assert_eq!(range_from_known_height(1000.0, 0.5, 0.0), None);
    }
}
