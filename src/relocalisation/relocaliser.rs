//! Relocaliser interface shared by the score relocaliser and its wrappers.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::features::RgbdFrame;
use crate::geometry::SE3;

/// Confidence attached to a relocalised pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocalisationQuality {
    Good,
    Poor,
}

/// A camera-to-world pose produced by relocalisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelocalisationResult {
    pub pose: SE3,
    pub quality: RelocalisationQuality,
}

/// Something that can learn a scene from posed frames and later recover the
/// pose of a new frame.
pub trait Relocaliser: Send {
    /// Add a frame with known camera-to-world pose to the scene model.
    fn train(&mut self, frame: &RgbdFrame, camera_to_world: &SE3) -> Result<()>;

    /// Spend one budgeted step of background model maintenance.
    fn update(&mut self) -> Result<()>;

    /// Bring the model fully up to date with everything trained so far.
    fn finish_training(&mut self) -> Result<()>;

    /// Estimate the pose of `frame`. `Ok(None)` means no pose was found.
    fn relocalise(&mut self, frame: &RgbdFrame) -> Result<Option<RelocalisationResult>>;

    /// Forget everything learned.
    fn reset(&mut self) -> Result<()>;
}
