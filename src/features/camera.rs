//! Pinhole camera intrinsics and depth back-projection.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::image::Image;

use super::{Keypoint3DColour, RgbdFrame};

/// Pinhole intrinsics of the depth camera (colour assumed registered).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Camera-space point for pixel (u, v) at depth `z` (metres).
    #[inline]
    pub fn backproject(&self, u: f32, v: f32, z: f32) -> Vector3<f32> {
        Vector3::new((u - self.cx) * z / self.fx, (v - self.cy) * z / self.fy, z)
    }

    /// Pixel coordinates of a camera-space point, `None` behind the camera.
    #[inline]
    pub fn project(&self, p: &Vector3<f32>) -> Option<Vector2<f32>> {
        if p.z <= 0.0 {
            return None;
        }
        Some(Vector2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }
}

/// Back-project every pixel with valid depth into a camera-space keypoint.
///
/// Pixels with non-finite or non-positive depth become invalid keypoints.
pub fn backproject_keypoints(frame: &RgbdFrame) -> Image<Keypoint3DColour> {
    let (width, height) = (frame.depth.width(), frame.depth.height());
    let mut keypoints = Image::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let (Some(&z), Some(&rgb)) = (frame.depth.get(x, y), frame.colour.get(x, y)) else {
                continue;
            };
            if !z.is_finite() || z <= 0.0 {
                continue;
            }
            if let Some(kp) = keypoints.get_mut(x, y) {
                *kp = Keypoint3DColour {
                    position: frame.intrinsics.backproject(x as f32, y as f32, z),
                    colour: Vector3::new(rgb[0], rgb[1], rgb[2]),
                    valid: true,
                };
            }
        }
    }

    keypoints
}
