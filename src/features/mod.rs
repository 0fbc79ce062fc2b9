//! Per-pixel inputs to the forest: keypoints and feature descriptors.
//!
//! Descriptor extraction itself lives outside this crate; callers plug in a
//! [`FeatureExtractor`]. What the forest needs from it is:
//! - one fixed-length descriptor per pixel ([`DescriptorImage`])
//! - one camera-space 3D point with colour per pixel ([`Keypoint3DColour`])

pub mod camera;

use anyhow::Result;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::image::Image;

pub use camera::{backproject_keypoints, CameraIntrinsics};

/// Camera-space 3D point and colour observed at one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint3DColour {
    pub position: Vector3<f32>,
    pub colour: Vector3<u8>,
    /// False when the pixel had no usable depth.
    pub valid: bool,
}

impl Default for Keypoint3DColour {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            colour: Vector3::zeros(),
            valid: false,
        }
    }
}

/// Keypoints of a whole frame, one per pixel.
pub type KeypointImage = Image<Keypoint3DColour>;

/// Dense image of fixed-length descriptors, stored contiguously.
///
/// The descriptor of pixel `i` (row-major) is `data[i * len..(i + 1) * len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorImage {
    width: usize,
    height: usize,
    descriptor_len: usize,
    data: Vec<f32>,
}

impl DescriptorImage {
    /// Create a zero-filled descriptor image.
    pub fn new(width: usize, height: usize, descriptor_len: usize) -> Self {
        Self {
            width,
            height,
            descriptor_len,
            data: vec![0.0; width * height * descriptor_len],
        }
    }

    /// Wrap an existing buffer. Returns `None` if the length does not match.
    pub fn from_vec(
        width: usize,
        height: usize,
        descriptor_len: usize,
        data: Vec<f32>,
    ) -> Option<Self> {
        if data.len() != width * height * descriptor_len {
            return None;
        }
        Some(Self {
            width,
            height,
            descriptor_len,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn descriptor_len(&self) -> usize {
        self.descriptor_len
    }

    /// Number of pixels (= number of descriptors).
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Descriptor of the pixel with row-major index `idx`.
    #[inline]
    pub fn descriptor(&self, idx: usize) -> &[f32] {
        let start = idx * self.descriptor_len;
        &self.data[start..start + self.descriptor_len]
    }

    /// Mutable descriptor of the pixel with row-major index `idx`.
    pub fn descriptor_mut(&mut self, idx: usize) -> &mut [f32] {
        let start = idx * self.descriptor_len;
        &mut self.data[start..start + self.descriptor_len]
    }

    /// True when the image has the same dimensions as `other`.
    pub fn same_shape<T>(&self, other: &Image<T>) -> bool {
        self.width == other.width() && self.height == other.height()
    }
}

/// A registered colour + depth frame with its intrinsics.
#[derive(Debug, Clone)]
pub struct RgbdFrame {
    pub colour: Image<[u8; 3]>,
    /// Depth in metres; zero or non-finite marks missing depth.
    pub depth: Image<f32>,
    pub intrinsics: CameraIntrinsics,
}

/// Source of per-pixel keypoints and descriptors for a frame.
pub trait FeatureExtractor: Send {
    /// Compute the keypoint and descriptor images for `frame`.
    fn compute_features(&self, frame: &RgbdFrame) -> Result<(KeypointImage, DescriptorImage)>;
}
