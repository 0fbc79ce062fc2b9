//! Per-pixel predictions: merged leaf modes for every keypoint of a frame.

pub mod merge;

pub use merge::merge_leaf_predictions;

use crate::clustering::ScorePrediction;
use crate::image::Image;

/// One merged prediction per pixel.
pub type PredictionImage = Image<ScorePrediction>;
