//! Forest-based relocaliser: features → modal predictions → RANSAC pose.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::backend::ExecutionBackend;
use crate::config::RelocaliserConfig;
use crate::features::{FeatureExtractor, RgbdFrame};
use crate::forest::ScoreForest;
use crate::geometry::SE3;
use crate::prediction::PredictionImage;

use super::ransac::{PoseCandidate, PoseFromModes, PreemptiveRansac};
use super::relocaliser::{RelocalisationQuality, RelocalisationResult, Relocaliser};

/// Relocaliser built on a [`ScoreForest`].
pub struct ScoreRelocaliser {
    extractor: Box<dyn FeatureExtractor>,
    forest: ScoreForest,
    solver: Box<dyn PoseFromModes>,
    last_candidate: Option<PoseCandidate>,
}

impl ScoreRelocaliser {
    pub fn new(
        extractor: Box<dyn FeatureExtractor>,
        forest: ScoreForest,
        solver: Box<dyn PoseFromModes>,
    ) -> Self {
        Self {
            extractor,
            forest,
            solver,
            last_candidate: None,
        }
    }

    /// Load the forest structure from `forest_path` and wire up the backend
    /// and pose solver described by `config`.
    pub fn from_config<P: AsRef<Path>>(
        extractor: Box<dyn FeatureExtractor>,
        forest_path: P,
        config: &RelocaliserConfig,
    ) -> Result<Self> {
        let backend = ExecutionBackend::from_config(&config.backend)?;
        let forest = ScoreForest::load_from_text(
            forest_path.as_ref(),
            config.forest.clone(),
            config.clustering.clone(),
            backend,
        )
        .with_context(|| format!("Failed to load forest {}", forest_path.as_ref().display()))?;

        info!(
            "Score relocaliser ready: {} trees, {:?} backend",
            forest.tree_count(),
            config.backend.kind
        );
        Ok(Self::new(
            extractor,
            forest,
            Box::new(PreemptiveRansac::new(config.ransac.clone())),
        ))
    }

    pub fn forest(&self) -> &ScoreForest {
        &self.forest
    }

    /// Solver output of the most recent `relocalise` call.
    pub fn last_candidate(&self) -> Option<&PoseCandidate> {
        self.last_candidate.as_ref()
    }

    /// Per-pixel predictions for `frame`, without estimating a pose.
    pub fn predict(&self, frame: &RgbdFrame) -> Result<PredictionImage> {
        let (keypoints, descriptors) = self.extractor.compute_features(frame)?;
        Ok(self.forest.evaluate_with_mask(&descriptors, &keypoints)?)
    }
}

impl Relocaliser for ScoreRelocaliser {
    fn train(&mut self, frame: &RgbdFrame, camera_to_world: &SE3) -> Result<()> {
        let (keypoints, descriptors) = self
            .extractor
            .compute_features(frame)
            .context("Feature extraction failed")?;
        self.forest
            .add_training_samples(&keypoints, &descriptors, camera_to_world)?;
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        self.forest.update();
        Ok(())
    }

    fn finish_training(&mut self) -> Result<()> {
        let updated = self.forest.update_all_predictions();
        info!("Finished training: {} leaves clustered", updated);
        Ok(())
    }

    fn relocalise(&mut self, frame: &RgbdFrame) -> Result<Option<RelocalisationResult>> {
        let (keypoints, descriptors) = self
            .extractor
            .compute_features(frame)
            .context("Feature extraction failed")?;
        let predictions = self.forest.evaluate_with_mask(&descriptors, &keypoints)?;

        self.last_candidate = self.solver.estimate_pose(&keypoints, &predictions);
        match &self.last_candidate {
            Some(candidate) => {
                debug!(
                    "Pose estimated: energy {:.3}, {} inliers",
                    candidate.energy, candidate.inliers
                );
                Ok(Some(RelocalisationResult {
                    pose: candidate.pose,
                    quality: RelocalisationQuality::Good,
                }))
            }
            None => Ok(None),
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.forest.reset();
        self.solver.reset();
        self.last_candidate = None;
        Ok(())
    }
}
