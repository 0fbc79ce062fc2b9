//! Score forest: routing, reservoirs and modal leaf predictions together.
//!
//! The forest owns three pieces of state, all indexed by flat leaf index:
//! - the node table (immutable after construction)
//! - the reservoir store (appended to by training, concurrently)
//! - the leaf prediction table (rebuilt by budgeted clustering passes)
//!
//! Prediction updates are copy-then-cluster: reservoirs are snapshotted
//! under their own locks, clustered with no lock held, and the new
//! predictions are swapped in under a short write lock. Evaluation holds the
//! read lock for the duration of one frame.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::ExecutionBackend;
use crate::clustering::{create_clusterer, ClusteringConfig, ExampleClusterer, ScorePrediction, MAX_MODES};
use crate::features::{DescriptorImage, KeypointImage};
use crate::geometry::SE3;
use crate::image::Image;
use crate::prediction::{merge_leaf_predictions, PredictionImage};

use super::error::ForestError;
use super::node::{ForestNode, NodeTable};
use super::reservoir::{ReservoirSample, ReservoirState, ReservoirStore};
use super::router::route;

/// Leaf reached in each tree by one pixel, indexed by tree.
pub type LeafIndices = Vec<u32>;

/// Per-pixel leaf indices of a frame.
pub type LeafIndexImage = Image<LeafIndices>;

/// Forest-level parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Samples kept per leaf.
    pub reservoir_capacity: usize,
    /// Leaves re-clustered per `update` call.
    pub max_reservoirs_to_update: usize,
    /// Seed of the reservoir sampling generators.
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            reservoir_capacity: 1024,
            max_reservoirs_to_update: 256,
            seed: 42,
        }
    }
}

/// Summary of one tree, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStatistics {
    pub tree: usize,
    pub node_count: usize,
    pub leaf_count: usize,
    pub depth: usize,
    /// Leaves whose reservoir holds at least one sample.
    pub filled_reservoirs: usize,
    /// Leaves with a non-empty prediction.
    pub predicted_leaves: usize,
}

impl fmt::Display for TreeStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tree {}: {} nodes, {} leaves, depth {}, {} filled reservoirs, {} predicted leaves",
            self.tree,
            self.node_count,
            self.leaf_count,
            self.depth,
            self.filled_reservoirs,
            self.predicted_leaves
        )
    }
}

#[derive(Serialize, Deserialize)]
struct ForestSnapshot {
    config: ForestConfig,
    trees: Vec<Vec<ForestNode>>,
    reservoirs: Vec<ReservoirState>,
    predictions: Vec<ScorePrediction>,
    update_cursor: usize,
}

/// A regression forest whose leaves predict modal scene coordinates.
pub struct ScoreForest {
    nodes: NodeTable,
    reservoirs: ReservoirStore,
    predictions: RwLock<Vec<ScorePrediction>>,
    clusterer: Box<dyn ExampleClusterer>,
    backend: ExecutionBackend,
    config: ForestConfig,
    /// Next flat leaf to re-cluster.
    update_cursor: Mutex<usize>,
}

impl ScoreForest {
    /// Create an untrained forest over `nodes`.
    pub fn new(
        nodes: NodeTable,
        config: ForestConfig,
        clustering: ClusteringConfig,
        backend: ExecutionBackend,
    ) -> Self {
        let leaves = nodes.total_leaves();
        Self {
            reservoirs: ReservoirStore::new(leaves, config.reservoir_capacity, config.seed),
            predictions: RwLock::new(vec![ScorePrediction::new(); leaves]),
            clusterer: create_clusterer(clustering, backend.clone()),
            backend,
            nodes,
            config,
            update_cursor: Mutex::new(0),
        }
    }

    /// Load the structure from a text forest file; reservoirs start empty.
    pub fn load_from_text<P: AsRef<Path>>(
        path: P,
        config: ForestConfig,
        clustering: ClusteringConfig,
        backend: ExecutionBackend,
    ) -> Result<Self, ForestError> {
        let nodes = NodeTable::load_from_text(path)?;
        Ok(Self::new(nodes, config, clustering, backend))
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn clustering_config(&self) -> &ClusteringConfig {
        self.clusterer.config()
    }

    pub fn tree_count(&self) -> usize {
        self.nodes.tree_count()
    }

    pub fn node_count(&self, tree: usize) -> Result<usize, ForestError> {
        self.check_tree(tree)?;
        Ok(self.nodes.node_count(tree))
    }

    pub fn leaf_count(&self, tree: usize) -> Result<usize, ForestError> {
        self.check_tree(tree)?;
        Ok(self.nodes.leaf_count(tree))
    }

    pub fn tree_depth(&self, tree: usize) -> Result<usize, ForestError> {
        self.check_tree(tree)?;
        Ok(self.nodes.tree_depth(tree))
    }

    /// True once at least one leaf has a non-empty prediction.
    pub fn is_trained(&self) -> bool {
        self.predictions.read().iter().any(|p| !p.is_empty())
    }

    /// Route every valid keypoint and add its world-space point to the
    /// reached leaf of every tree. Returns the number of pixels used.
    pub fn add_training_samples(
        &self,
        keypoints: &KeypointImage,
        descriptors: &DescriptorImage,
        camera_to_world: &SE3,
    ) -> Result<usize, ForestError> {
        self.check_descriptors(descriptors)?;
        if !descriptors.same_shape(keypoints) {
            return Err(size_mismatch(descriptors, keypoints.width(), keypoints.height()));
        }

        let pixels = keypoints.as_slice();
        let used = self.backend.map_indices(pixels.len(), |p| {
            let keypoint = &pixels[p];
            if !keypoint.valid {
                return false;
            }
            let world = camera_to_world.transform_point_f32(&keypoint.position);
            let descriptor = descriptors.descriptor(p);
            for tree in 0..self.nodes.tree_count() {
                let leaf = route(&self.nodes, tree, descriptor) as usize;
                let added = self
                    .reservoirs
                    .add(self.nodes.leaf_offset(tree) + leaf, world, keypoint.colour);
                debug_assert!(added.is_ok(), "routed leaf outside the store: {:?}", added);
            }
            true
        });

        let count = used.into_iter().filter(|&u| u).count();
        debug!("Added {} training pixels to {} trees", count, self.nodes.tree_count());
        Ok(count)
    }

    /// Re-cluster up to `leaf_budget` leaves, continuing round-robin from
    /// where the previous call stopped. Returns the number of leaves updated.
    pub fn update_predictions(&self, leaf_budget: usize) -> usize {
        let total = self.nodes.total_leaves();
        let count = leaf_budget.min(total);
        if count == 0 {
            return 0;
        }

        // Step 1: Claim the next window of leaves
        let start = {
            let mut cursor = self.update_cursor.lock();
            let start = *cursor;
            *cursor = (start + count) % total;
            start
        };
        let leaves: Vec<usize> = (0..count).map(|k| (start + k) % total).collect();

        // Step 2: Snapshot their reservoirs
        let snapshots: Vec<Vec<ReservoirSample>> = leaves
            .iter()
            .map(|&leaf| self.reservoirs.get(leaf).unwrap_or_default())
            .collect();

        // Step 3: Cluster with no lock held
        let modes = self.clusterer.find_modes(&snapshots);

        // Step 4: Swap the new predictions in
        {
            let mut predictions = self.predictions.write();
            for (&leaf, prediction) in leaves.iter().zip(modes) {
                predictions[leaf] = prediction;
            }
        }

        debug!("Updated predictions of {} leaves starting at {}", count, start);
        count
    }

    /// Re-cluster `max_reservoirs_to_update` leaves.
    pub fn update(&self) -> usize {
        self.update_predictions(self.config.max_reservoirs_to_update)
    }

    /// Re-cluster every leaf.
    pub fn update_all_predictions(&self) -> usize {
        self.update_predictions(self.nodes.total_leaves())
    }

    /// Merged prediction for every pixel of `descriptors`.
    pub fn evaluate(&self, descriptors: &DescriptorImage) -> Result<PredictionImage, ForestError> {
        self.evaluate_impl(descriptors, None)
    }

    /// Like [`evaluate`](Self::evaluate), but pixels whose keypoint is
    /// invalid get an empty prediction without being routed.
    pub fn evaluate_with_mask(
        &self,
        descriptors: &DescriptorImage,
        keypoints: &KeypointImage,
    ) -> Result<PredictionImage, ForestError> {
        if !descriptors.same_shape(keypoints) {
            return Err(size_mismatch(descriptors, keypoints.width(), keypoints.height()));
        }
        self.evaluate_impl(descriptors, Some(keypoints))
    }

    fn evaluate_impl(
        &self,
        descriptors: &DescriptorImage,
        mask: Option<&KeypointImage>,
    ) -> Result<PredictionImage, ForestError> {
        self.check_descriptors(descriptors)?;

        let guard = self.predictions.read();
        let predictions: &[ScorePrediction] = &guard;
        let tree_count = self.nodes.tree_count();

        let merged = self.backend.map_indices(descriptors.pixel_count(), |p| {
            if mask.is_some_and(|m| !m.as_slice()[p].valid) {
                return ScorePrediction::new();
            }
            let descriptor = descriptors.descriptor(p);
            let leaves: Vec<&ScorePrediction> = (0..tree_count)
                .map(|tree| {
                    let leaf = route(&self.nodes, tree, descriptor) as usize;
                    &predictions[self.nodes.leaf_offset(tree) + leaf]
                })
                .collect();
            merge_leaf_predictions(&leaves, MAX_MODES)
        });

        Image::from_vec(descriptors.width(), descriptors.height(), merged)
            .ok_or_else(|| size_mismatch(descriptors, 0, 0))
    }

    /// Leaf reached in each tree, for every pixel.
    pub fn leaf_indices(&self, descriptors: &DescriptorImage) -> Result<LeafIndexImage, ForestError> {
        self.check_descriptors(descriptors)?;

        let leaves = self.backend.map_indices(descriptors.pixel_count(), |p| {
            let descriptor = descriptors.descriptor(p);
            (0..self.nodes.tree_count())
                .map(|tree| route(&self.nodes, tree, descriptor))
                .collect::<LeafIndices>()
        });

        Image::from_vec(descriptors.width(), descriptors.height(), leaves)
            .ok_or_else(|| size_mismatch(descriptors, 0, 0))
    }

    /// Forget all training: empty reservoirs and predictions, rewind the cursor.
    pub fn reset(&self) {
        self.reservoirs.reset();
        self.predictions
            .write()
            .iter_mut()
            .for_each(|p| *p = ScorePrediction::new());
        *self.update_cursor.lock() = 0;
        info!("Forest reset: {} leaves cleared", self.nodes.total_leaves());
    }

    /// Forget the training of one tree; the other trees keep their
    /// reservoirs and predictions.
    pub fn reset_tree(&self, tree: usize) -> Result<(), ForestError> {
        self.check_tree(tree)?;
        let offset = self.nodes.leaf_offset(tree);
        let range = offset..offset + self.nodes.leaf_count(tree);

        self.reservoirs.reset_range(range.clone())?;
        self.predictions.write()[range]
            .iter_mut()
            .for_each(|p| *p = ScorePrediction::new());
        info!("Tree {} reset: {} leaves cleared", tree, self.nodes.leaf_count(tree));
        Ok(())
    }

    /// Current prediction of one leaf.
    pub fn get_raw_prediction(&self, tree: usize, leaf: usize) -> Result<ScorePrediction, ForestError> {
        let flat = self.nodes.flat_leaf_index(tree, leaf)?;
        Ok(self.predictions.read()[flat].clone())
    }

    /// Current reservoir contents of one leaf.
    pub fn get_reservoir_contents(
        &self,
        tree: usize,
        leaf: usize,
    ) -> Result<Vec<ReservoirSample>, ForestError> {
        let flat = self.nodes.flat_leaf_index(tree, leaf)?;
        self.reservoirs.get(flat)
    }

    /// Per-tree structure and fill statistics.
    pub fn statistics(&self) -> Vec<TreeStatistics> {
        let predictions = self.predictions.read();
        (0..self.nodes.tree_count())
            .map(|tree| {
                let offset = self.nodes.leaf_offset(tree);
                let leaf_count = self.nodes.leaf_count(tree);
                let range = offset..offset + leaf_count;
                TreeStatistics {
                    tree,
                    node_count: self.nodes.node_count(tree),
                    leaf_count,
                    depth: self.nodes.tree_depth(tree),
                    filled_reservoirs: range
                        .clone()
                        .filter(|&i| self.reservoirs.sample_count(i).unwrap_or(0) > 0)
                        .count(),
                    predicted_leaves: predictions[range].iter().filter(|p| !p.is_empty()).count(),
                }
            })
            .collect()
    }

    /// Write structure, reservoirs and predictions as JSON.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<(), ForestError> {
        let snapshot = ForestSnapshot {
            config: self.config.clone(),
            trees: (0..self.nodes.tree_count())
                .map(|t| self.nodes.tree_nodes(t))
                .collect(),
            reservoirs: self.reservoirs.export(),
            predictions: self.predictions.read().clone(),
            update_cursor: *self.update_cursor.lock(),
        };
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, &snapshot)?;
        info!("Saved forest snapshot to {}", path.as_ref().display());
        Ok(())
    }

    /// Restore a forest written by [`save_snapshot`](Self::save_snapshot).
    pub fn load_snapshot<P: AsRef<Path>>(
        path: P,
        clustering: ClusteringConfig,
        backend: ExecutionBackend,
    ) -> Result<Self, ForestError> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let snapshot: ForestSnapshot = serde_json::from_reader(reader)?;

        let nodes = NodeTable::from_trees(&snapshot.trees)?;
        let total = nodes.total_leaves();
        if snapshot.predictions.len() != total {
            return Err(ForestError::InconsistentSnapshot(format!(
                "{} predictions for {} leaves",
                snapshot.predictions.len(),
                total
            )));
        }

        for (leaf, prediction) in snapshot.predictions.iter().enumerate() {
            prediction.validate().map_err(|message| {
                ForestError::InconsistentSnapshot(format!("leaf {}: {}", leaf, message))
            })?;
        }

        let forest = Self::new(nodes, snapshot.config, clustering, backend);
        forest.reservoirs.import(snapshot.reservoirs)?;
        *forest.predictions.write() = snapshot.predictions;
        *forest.update_cursor.lock() = snapshot.update_cursor % total.max(1);

        info!(
            "Loaded forest snapshot from {}: {} trees, {} leaves",
            path.as_ref().display(),
            forest.tree_count(),
            total
        );
        Ok(forest)
    }

    fn check_tree(&self, tree: usize) -> Result<(), ForestError> {
        if tree >= self.nodes.tree_count() {
            return Err(ForestError::TreeOutOfRange {
                tree,
                tree_count: self.nodes.tree_count(),
            });
        }
        Ok(())
    }

    fn check_descriptors(&self, descriptors: &DescriptorImage) -> Result<(), ForestError> {
        let required = self.nodes.required_descriptor_len();
        if descriptors.descriptor_len() < required {
            return Err(ForestError::DescriptorTooShort {
                required,
                actual: descriptors.descriptor_len(),
            });
        }
        Ok(())
    }
}

fn size_mismatch(descriptors: &DescriptorImage, width: usize, height: usize) -> ForestError {
    ForestError::ImageSizeMismatch {
        expected: (descriptors.width(), descriptors.height()),
        actual: (width, height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AcceleratorBackend;
    use crate::features::Keypoint3DColour;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    /// One split on feature 0 at 0.5: leaf 0 left, leaf 1 right.
    fn stump() -> NodeTable {
        NodeTable::from_trees(&[
            vec![
                ForestNode::split(1, 0, 0.5),
                ForestNode::leaf(0),
                ForestNode::leaf(1),
            ],
            vec![ForestNode::leaf(0)],
        ])
        .unwrap()
    }

    fn small_clustering() -> ClusteringConfig {
        ClusteringConfig {
            min_cluster_size: 3,
            ..Default::default()
        }
    }

    fn forest(backend: ExecutionBackend) -> ScoreForest {
        ScoreForest::new(stump(), ForestConfig::default(), small_clustering(), backend)
    }

    /// 4x2 frame: left half descriptor 0.0, right half 1.0; all keypoints
    /// at `point` (camera space) except pixel 0, which is invalid.
    fn frame(point: Vector3<f32>) -> (KeypointImage, DescriptorImage) {
        let mut keypoints = KeypointImage::new(4, 2);
        let mut descriptors = DescriptorImage::new(4, 2, 1);
        for p in 0..8 {
            keypoints.as_mut_slice()[p] = Keypoint3DColour {
                position: point,
                colour: Vector3::new(10, 20, 30),
                valid: p != 0,
            };
            descriptors.descriptor_mut(p)[0] = if p % 4 < 2 { 0.0 } else { 1.0 };
        }
        (keypoints, descriptors)
    }

    #[test]
    fn test_reset_then_evaluate_is_empty() {
        let forest = forest(ExecutionBackend::default());
        let (kp, desc) = frame(Vector3::new(0.0, 0.0, 1.0));
        forest.add_training_samples(&kp, &desc, &SE3::identity()).unwrap();
        forest.update_all_predictions();
        assert!(forest.is_trained());

        forest.reset();

        assert!(!forest.is_trained());
        let predictions = forest.evaluate(&desc).unwrap();
        assert!(predictions.iter().all(|p| p.is_empty()));
        assert!(forest.get_reservoir_contents(0, 1).unwrap().is_empty());
    }

    #[test]
    fn test_train_then_evaluate_recovers_point() {
        for backend in [
            ExecutionBackend::default(),
            ExecutionBackend::Accelerator(AcceleratorBackend::new(4, 2)),
        ] {
            let forest = forest(backend);
            let pose = SE3::from_axis_angle(Vector3::new(0.0, 0.3, 0.0), Vector3::new(1.0, 2.0, 3.0));
            let camera_point = Vector3::new(0.1, -0.2, 1.5);
            let (kp, desc) = frame(camera_point);

            assert_eq!(forest.add_training_samples(&kp, &desc, &pose).unwrap(), 7);
            assert_eq!(forest.update_all_predictions(), 4);

            let predictions = forest.evaluate_with_mask(&desc, &kp).unwrap();
            let expected = pose.transform_point_f32(&camera_point);

            assert!(predictions.get(0, 0).unwrap().is_empty());
            let best = predictions.get(3, 1).unwrap().best().unwrap();
            assert_relative_eq!(best.position, expected, epsilon = 1e-4);
            assert_eq!(best.colour, Vector3::new(10, 20, 30));
        }
    }

    #[test]
    fn test_leaf_indices_and_raw_prediction() {
        let forest = forest(ExecutionBackend::default());
        let (kp, desc) = frame(Vector3::new(0.0, 0.0, 2.0));

        let leaves = forest.leaf_indices(&desc).unwrap();
        assert_eq!(leaves.get(0, 0).unwrap(), &vec![0, 0]);
        assert_eq!(leaves.get(3, 0).unwrap(), &vec![1, 0]);

        forest.add_training_samples(&kp, &desc, &SE3::identity()).unwrap();
        forest.update_all_predictions();

        // Left leaf of tree 0 saw 3 valid pixels, right leaf 4, tree 1 all 7.
        assert_eq!(forest.get_raw_prediction(0, 0).unwrap().best().unwrap().inliers, 3);
        assert_eq!(forest.get_raw_prediction(0, 1).unwrap().best().unwrap().inliers, 4);
        assert_eq!(forest.get_raw_prediction(1, 0).unwrap().best().unwrap().inliers, 7);
        assert!(matches!(
            forest.get_raw_prediction(0, 2),
            Err(ForestError::LeafOutOfRange { .. })
        ));
        assert!(matches!(
            forest.get_reservoir_contents(2, 0),
            Err(ForestError::TreeOutOfRange { .. })
        ));
    }

    #[test]
    fn test_budgeted_updates_are_round_robin() {
        let forest = forest(ExecutionBackend::default());
        let (kp, desc) = frame(Vector3::new(0.0, 0.0, 2.0));
        forest.add_training_samples(&kp, &desc, &SE3::identity()).unwrap();

        assert_eq!(forest.update_predictions(2), 2);
        assert!(!forest.get_raw_prediction(0, 1).unwrap().is_empty());
        assert!(forest.get_raw_prediction(1, 0).unwrap().is_empty());

        assert_eq!(forest.update_predictions(2), 2);
        assert!(!forest.get_raw_prediction(1, 0).unwrap().is_empty());
        assert_eq!(forest.update_predictions(0), 0);
    }

    #[test]
    fn test_short_descriptors_rejected() {
        let forest = forest(ExecutionBackend::default());
        let desc = DescriptorImage::new(2, 2, 0);
        assert!(matches!(
            forest.evaluate(&desc),
            Err(ForestError::DescriptorTooShort { required: 1, actual: 0 })
        ));
    }

    #[test]
    fn test_statistics() {
        let forest = forest(ExecutionBackend::default());
        let (kp, desc) = frame(Vector3::new(0.0, 0.0, 2.0));
        forest.add_training_samples(&kp, &desc, &SE3::identity()).unwrap();
        forest.update_predictions(1);

        let stats = forest.statistics();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].node_count, 3);
        assert_eq!(stats[0].depth, 1);
        assert_eq!(stats[0].filled_reservoirs, 2);
        assert_eq!(stats[0].predicted_leaves, 1);
        assert_eq!(stats[1].predicted_leaves, 0);
        assert!(stats[0].to_string().starts_with("tree 0: 3 nodes"));
    }

    #[test]
    fn test_reset_tree_keeps_other_trees() {
        let forest = forest(ExecutionBackend::default());
        let (kp, desc) = frame(Vector3::new(0.0, 0.0, 2.0));
        forest.add_training_samples(&kp, &desc, &SE3::identity()).unwrap();
        forest.update_all_predictions();

        forest.reset_tree(0).unwrap();

        assert!(forest.get_raw_prediction(0, 0).unwrap().is_empty());
        assert!(forest.get_raw_prediction(0, 1).unwrap().is_empty());
        assert!(forest.get_reservoir_contents(0, 1).unwrap().is_empty());
        assert_eq!(forest.get_raw_prediction(1, 0).unwrap().best().unwrap().inliers, 7);
        assert_eq!(forest.get_reservoir_contents(1, 0).unwrap().len(), 7);
        assert!(forest.is_trained());

        assert!(matches!(
            forest.reset_tree(2),
            Err(ForestError::TreeOutOfRange { tree: 2, tree_count: 2 })
        ));
    }

    #[test]
    fn test_snapshot_with_unranked_modes_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.json");

        let forest = forest(ExecutionBackend::default());
        let (kp, desc) = frame(Vector3::new(0.5, 0.5, 2.0));
        forest.add_training_samples(&kp, &desc, &SE3::identity()).unwrap();
        forest.update_all_predictions();
        forest.save_snapshot(&path).unwrap();

        // Rewrite leaf 0 of tree 1 with modes ranked [5, 10, 0].
        let mut json: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        let modes = &mut json["predictions"][2]["modes"];
        let mode = modes[0].clone();
        *modes = serde_json::Value::Array(
            [5, 10, 0]
                .iter()
                .map(|&n| {
                    let mut m = mode.clone();
                    m["inliers"] = n.into();
                    m
                })
                .collect(),
        );
        serde_json::to_writer(File::create(&path).unwrap(), &json).unwrap();

        assert!(matches!(
            ScoreForest::load_snapshot(&path, small_clustering(), ExecutionBackend::default()),
            Err(ForestError::InconsistentSnapshot(_))
        ));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.json");

        let forest = forest(ExecutionBackend::default());
        let (kp, desc) = frame(Vector3::new(0.5, 0.5, 2.0));
        forest.add_training_samples(&kp, &desc, &SE3::identity()).unwrap();
        forest.update_predictions(2);
        forest.save_snapshot(&path).unwrap();

        let restored =
            ScoreForest::load_snapshot(&path, small_clustering(), ExecutionBackend::default()).unwrap();

        assert_eq!(restored.nodes(), forest.nodes());
        assert_eq!(
            restored.get_reservoir_contents(0, 1).unwrap(),
            forest.get_reservoir_contents(0, 1).unwrap()
        );
        assert_eq!(
            restored.evaluate(&desc).unwrap(),
            forest.evaluate(&desc).unwrap()
        );
        // Cursor was persisted: the next update touches the remaining leaf.
        assert_eq!(restored.update_predictions(1), 1);
        assert!(!restored.get_raw_prediction(1, 0).unwrap().is_empty());
    }
}
