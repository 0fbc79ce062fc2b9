//! Preemptive RANSAC: camera pose from per-pixel modal predictions.
//!
//! Hypotheses are generated from random triplets of (camera point, predicted
//! world mode) correspondences and then culled by halving:
//! 1. Generate up to `max_hypotheses` rigid poses with Horn/Kabsch alignment,
//!    keeping only triplets whose pairwise distances agree in camera and
//!    world space (and, optionally, whose mode colours match the pixels)
//! 2. Add a batch of random pixels to the shared sample set
//! 3. Score every hypothesis on the sample set (lower energy is better)
//! 4. Keep the better half, refine the survivors on their inliers
//! 5. Repeat from 2 until one hypothesis remains

use nalgebra::Vector3;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clustering::ScorePrediction;
use crate::features::{Keypoint3DColour, KeypointImage};
use crate::geometry::{rigid_transform, SE3};
use crate::prediction::PredictionImage;

/// Floor on the mixture density of one pixel, so outliers cost a bounded
/// energy.
const MIN_PIXEL_DENSITY: f64 = 1e-6;

/// Configuration of the preemptive RANSAC solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Hypotheses generated per frame.
    pub max_hypotheses: usize,
    /// Triplet draws allowed per requested hypothesis before giving up.
    pub max_generation_attempts: usize,
    /// Pixels added to the scoring set per culling round.
    pub batch_size: usize,
    /// Minimum pairwise camera-space distance within a triplet (metres).
    pub min_triplet_distance: f32,
    /// Maximum camera/world pairwise distance disagreement (metres).
    pub max_distance_delta: f32,
    /// Reject modes whose colour differs from the pixel's.
    pub check_colour: bool,
    /// Largest per-channel colour difference for `check_colour`.
    pub max_colour_delta: u8,
    /// Use only the best `modes_per_pixel` modes of a pixel when generating.
    pub modes_per_pixel: usize,
    /// Refine surviving hypotheses on their inliers after each cull.
    pub refine: bool,
    /// Distance to the closest mode under which a pixel is an inlier (metres).
    pub inlier_threshold: f32,
    /// Minimum number of pixels with predictions to attempt estimation.
    pub min_valid_pixels: usize,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_hypotheses: 1024,
            max_generation_attempts: 100,
            batch_size: 500,
            min_triplet_distance: 0.05,
            max_distance_delta: 0.05,
            check_colour: true,
            max_colour_delta: 30,
            modes_per_pixel: 10,
            refine: true,
            inlier_threshold: 0.05,
            min_valid_pixels: 3,
            seed: 42,
        }
    }
}

/// A camera-to-world pose and how well it explains the sampled pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseCandidate {
    pub pose: SE3,
    /// Mean per-pixel energy on the final sample set.
    pub energy: f64,
    /// Sampled pixels within `inlier_threshold` of a predicted mode.
    pub inliers: usize,
}

/// Estimates a camera pose from keypoints and their modal predictions.
pub trait PoseFromModes: Send {
    fn estimate_pose(
        &mut self,
        keypoints: &KeypointImage,
        predictions: &PredictionImage,
    ) -> Option<PoseCandidate>;

    /// Restore the initial state (e.g. reseed random generators).
    fn reset(&mut self) {}
}

struct Hypothesis {
    pose: SE3,
    energy: f64,
}

/// Preemptive RANSAC over modal predictions.
pub struct PreemptiveRansac {
    config: RansacConfig,
    rng: StdRng,
}

impl PreemptiveRansac {
    pub fn new(config: RansacConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn config(&self) -> &RansacConfig {
        &self.config
    }

    fn generate_hypothesis(
        &mut self,
        pixels: &[usize],
        keypoints: &[Keypoint3DColour],
        predictions: &[ScorePrediction],
    ) -> Option<SE3> {
        let cfg = &self.config;
        let mut camera = [Vector3::<f64>::zeros(); 3];
        let mut world = [Vector3::<f64>::zeros(); 3];

        for k in 0..3 {
            let p = pixels[self.rng.gen_range(0..pixels.len())];
            let keypoint = &keypoints[p];
            let modes = predictions[p].modes();
            let mode = &modes[self.rng.gen_range(0..modes.len().min(cfg.modes_per_pixel.max(1)))];

            if cfg.check_colour && !colours_match(&keypoint.colour, &mode.colour, cfg.max_colour_delta) {
                return None;
            }

            let cam = keypoint.position.cast::<f64>();
            let wld = mode.position.cast::<f64>();
            for j in 0..k {
                let cam_dist = (cam - camera[j]).norm();
                let world_dist = (wld - world[j]).norm();
                if cam_dist < cfg.min_triplet_distance as f64
                    || (cam_dist - world_dist).abs() > cfg.max_distance_delta as f64
                {
                    return None;
                }
            }
            camera[k] = cam;
            world[k] = wld;
        }

        rigid_transform(&camera, &world)
    }

    /// Re-estimate `pose` on the sampled pixels it explains.
    fn refine(
        &self,
        pose: &SE3,
        sample: &[usize],
        keypoints: &[Keypoint3DColour],
        predictions: &[ScorePrediction],
    ) -> SE3 {
        let threshold_sq = (self.config.inlier_threshold * self.config.inlier_threshold) as f64;
        let mut camera = Vec::new();
        let mut world = Vec::new();
        for &p in sample {
            let cam = keypoints[p].position.cast::<f64>();
            let predicted = pose.transform_point(&cam);
            if let Some(mode) = predictions[p].closest(&predicted.cast::<f32>()) {
                let target = mode.position.cast::<f64>();
                if (target - predicted).norm_squared() < threshold_sq {
                    camera.push(cam);
                    world.push(target);
                }
            }
        }
        rigid_transform(&camera, &world).unwrap_or(*pose)
    }

    fn count_inliers(
        &self,
        pose: &SE3,
        sample: &[usize],
        keypoints: &[Keypoint3DColour],
        predictions: &[ScorePrediction],
    ) -> usize {
        let threshold_sq = self.config.inlier_threshold * self.config.inlier_threshold;
        sample
            .iter()
            .filter(|&&p| {
                let predicted = pose.transform_point_f32(&keypoints[p].position);
                predictions[p]
                    .closest(&predicted)
                    .is_some_and(|m| (m.position - predicted).norm_squared() < threshold_sq)
            })
            .count()
    }
}

impl Default for PreemptiveRansac {
    fn default() -> Self {
        Self::new(RansacConfig::default())
    }
}

impl PoseFromModes for PreemptiveRansac {
    fn estimate_pose(
        &mut self,
        keypoints: &KeypointImage,
        predictions: &PredictionImage,
    ) -> Option<PoseCandidate> {
        if !keypoints.same_shape(predictions) {
            return None;
        }
        let keypoints = keypoints.as_slice();
        let predictions = predictions.as_slice();

        // Step 1: Pixels usable as correspondences
        let pixels: Vec<usize> = (0..keypoints.len())
            .filter(|&p| keypoints[p].valid && !predictions[p].is_empty())
            .collect();
        if pixels.len() < self.config.min_valid_pixels.max(3) {
            debug!("Preemptive RANSAC: only {} usable pixels", pixels.len());
            return None;
        }

        // Step 2: Generate hypotheses
        let max_attempts = self.config.max_hypotheses * self.config.max_generation_attempts.max(1);
        let mut hypotheses = Vec::with_capacity(self.config.max_hypotheses);
        let mut attempts = 0;
        while hypotheses.len() < self.config.max_hypotheses && attempts < max_attempts {
            attempts += 1;
            if let Some(pose) = self.generate_hypothesis(&pixels, keypoints, predictions) {
                hypotheses.push(Hypothesis { pose, energy: 0.0 });
            }
        }
        if hypotheses.is_empty() {
            debug!("Preemptive RANSAC: no hypothesis after {} attempts", attempts);
            return None;
        }
        debug!("Preemptive RANSAC: {} hypotheses from {} attempts", hypotheses.len(), attempts);

        // Step 3: Cull by halving on a growing pixel sample
        let mut sample: Vec<usize> = Vec::new();
        loop {
            let batch = self.config.batch_size.max(1);
            sample.extend((0..batch).map(|_| pixels[self.rng.gen_range(0..pixels.len())]));

            hypotheses.par_iter_mut().for_each(|h| {
                h.energy = mean_energy(&h.pose, &sample, keypoints, predictions);
            });
            hypotheses.sort_by(|a, b| a.energy.total_cmp(&b.energy));

            if hypotheses.len() == 1 {
                break;
            }
            hypotheses.truncate(hypotheses.len() / 2);
            debug!("Preemptive RANSAC: {} hypotheses left", hypotheses.len());

            if self.config.refine {
                let refined: Vec<SE3> = hypotheses
                    .par_iter()
                    .map(|h| self.refine(&h.pose, &sample, keypoints, predictions))
                    .collect();
                for (h, pose) in hypotheses.iter_mut().zip(refined) {
                    h.pose = pose;
                }
            }
        }

        let best = hypotheses.swap_remove(0);
        Some(PoseCandidate {
            pose: best.pose,
            energy: best.energy,
            inliers: self.count_inliers(&best.pose, &sample, keypoints, predictions),
        })
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.config.seed);
    }
}

fn colours_match(a: &Vector3<u8>, b: &Vector3<u8>, max_delta: u8) -> bool {
    a.iter().zip(b.iter()).all(|(&x, &y)| x.abs_diff(y) <= max_delta)
}

/// Mean over `sample` of -ln(mixture density of the predicted world point).
fn mean_energy(
    pose: &SE3,
    sample: &[usize],
    keypoints: &[Keypoint3DColour],
    predictions: &[ScorePrediction],
) -> f64 {
    let total: f64 = sample
        .iter()
        .map(|&p| {
            let predicted = pose.transform_point_f32(&keypoints[p].position);
            pixel_energy(&predictions[p], &predicted)
        })
        .sum();
    total / sample.len().max(1) as f64
}

fn pixel_energy(prediction: &ScorePrediction, point: &Vector3<f32>) -> f64 {
    let total_inliers: u32 = prediction.modes().iter().map(|m| m.inliers).sum();
    if total_inliers == 0 {
        return -MIN_PIXEL_DENSITY.ln();
    }
    let density: f64 = prediction
        .modes()
        .iter()
        .map(|m| (m.log_likelihood(point) as f64).exp())
        .sum::<f64>()
        / total_inliers as f64;
    -density.max(MIN_PIXEL_DENSITY).ln()
}
