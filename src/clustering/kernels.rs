//! Accelerator clusterer: quick shift as a sequence of grid kernels.
//!
//! All reservoirs of a batch are packed into one flat sample buffer with a
//! per-leaf offset table, then processed by passes of one invocation per
//! sample, per leaf or per output mode:
//!
//! | pass | grid | output |
//! |------|------|--------|
//! | density | sample | `densities[k]` |
//! | parent | sample | `parents[k]` (leaf-local) |
//! | root | sample | `roots[k]` (leaf-local) |
//! | root numbering | leaf | root → cluster id table |
//! | labelling | sample | `cluster_of[k]` |
//! | histogram | sample | atomic `sizes[cluster]` |
//! | selection | leaf | kept cluster ids |
//! | statistics | mode | [`Mode`] |
//!
//! Invocations only read buffers produced by earlier passes, and the only
//! shared writes are integer atomic increments, so results are independent
//! of scheduling and identical to [`cluster_samples`](super::cluster_samples).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::backend::ExecutionBackend;
use crate::forest::reservoir::ReservoirSample;

use super::config::ClusteringConfig;
use super::mode::ScorePrediction;
use super::quick_shift::{compute_mode, find_parent, find_root, sample_density, select_clusters};
use super::ExampleClusterer;

/// Flat packing of a batch of reservoirs.
struct PackedBatch {
    samples: Vec<ReservoirSample>,
    /// `offsets[leaf]..offsets[leaf + 1]` are the samples of `leaf`.
    offsets: Vec<usize>,
    /// Leaf owning each packed sample.
    sample_leaf: Vec<u32>,
}

impl PackedBatch {
    fn pack(reservoirs: &[Vec<ReservoirSample>]) -> Self {
        let total: usize = reservoirs.iter().map(Vec::len).sum();
        let mut samples = Vec::with_capacity(total);
        let mut offsets = Vec::with_capacity(reservoirs.len() + 1);
        let mut sample_leaf = Vec::with_capacity(total);

        offsets.push(0);
        for (leaf, reservoir) in reservoirs.iter().enumerate() {
            samples.extend_from_slice(reservoir);
            sample_leaf.extend(std::iter::repeat(leaf as u32).take(reservoir.len()));
            offsets.push(samples.len());
        }

        Self {
            samples,
            offsets,
            sample_leaf,
        }
    }

    fn leaf_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Sample range of the leaf owning packed sample `k`.
    #[inline]
    fn range_of_sample(&self, k: usize) -> (usize, usize) {
        self.range_of_leaf(self.sample_leaf[k] as usize)
    }

    #[inline]
    fn range_of_leaf(&self, leaf: usize) -> (usize, usize) {
        (self.offsets[leaf], self.offsets[leaf + 1])
    }
}

/// Kernel-pass clusterer for the accelerator backend.
pub struct AcceleratorExampleClusterer {
    config: ClusteringConfig,
    backend: ExecutionBackend,
}

impl AcceleratorExampleClusterer {
    pub fn new(config: ClusteringConfig, backend: ExecutionBackend) -> Self {
        Self { config, backend }
    }
}

impl ExampleClusterer for AcceleratorExampleClusterer {
    fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    fn find_modes(&self, reservoirs: &[Vec<ReservoirSample>]) -> Vec<ScorePrediction> {
        let batch = PackedBatch::pack(reservoirs);
        let total = batch.samples.len();
        let leaf_count = batch.leaf_count();
        let cfg = &self.config;

        let densities: Vec<f32> = self.backend.map_indices(total, |k| {
            let (s, e) = batch.range_of_sample(k);
            sample_density(&batch.samples[s..e], k - s, cfg.sigma)
        });

        let parents: Vec<usize> = self.backend.map_indices(total, |k| {
            let (s, e) = batch.range_of_sample(k);
            find_parent(&batch.samples[s..e], &densities[s..e], k - s, cfg.tau)
        });

        let roots: Vec<usize> = self.backend.map_indices(total, |k| {
            let (s, e) = batch.range_of_sample(k);
            find_root(&parents[s..e], k - s)
        });

        // Number the roots of each leaf in sample order.
        let root_ids: Vec<Vec<u32>> = self.backend.map_indices(leaf_count, |leaf| {
            let (s, e) = batch.range_of_leaf(leaf);
            let mut next = 0u32;
            let mut ids = vec![u32::MAX; e - s];
            for (local, id) in ids.iter_mut().enumerate() {
                if roots[s + local] == local {
                    *id = next;
                    next += 1;
                }
            }
            ids
        });

        let cluster_of: Vec<u32> = self.backend.map_indices(total, |k| {
            root_ids[batch.sample_leaf[k] as usize][roots[k]]
        });

        // Offset of each leaf's clusters in the shared histogram.
        let mut cluster_base = Vec::with_capacity(leaf_count + 1);
        let mut next_base = 0usize;
        cluster_base.push(next_base);
        for ids in &root_ids {
            next_base += ids.iter().filter(|&&id| id != u32::MAX).count();
            cluster_base.push(next_base);
        }

        let histogram: Vec<AtomicU32> = (0..cluster_base[leaf_count])
            .map(|_| AtomicU32::new(0))
            .collect();
        self.backend.for_each_index(total, |k| {
            let leaf = batch.sample_leaf[k] as usize;
            histogram[cluster_base[leaf] + cluster_of[k] as usize].fetch_add(1, Ordering::Relaxed);
        });
        let sizes: Vec<u32> = histogram.iter().map(|h| h.load(Ordering::Relaxed)).collect();

        let selected: Vec<Vec<usize>> = self.backend.map_indices(leaf_count, |leaf| {
            select_clusters(&sizes[cluster_base[leaf]..cluster_base[leaf + 1]], cfg)
        });

        let jobs: Vec<(usize, u32)> = selected
            .iter()
            .enumerate()
            .flat_map(|(leaf, clusters)| clusters.iter().map(move |&c| (leaf, c as u32)))
            .collect();

        let modes = self.backend.map_indices(jobs.len(), |j| {
            let (leaf, cluster) = jobs[j];
            let (s, e) = batch.range_of_leaf(leaf);
            compute_mode(&batch.samples[s..e], &cluster_of[s..e], cluster)
        });

        let mut per_leaf: Vec<Vec<_>> = (0..leaf_count).map(|_| Vec::new()).collect();
        for (&(leaf, _), mode) in jobs.iter().zip(modes) {
            per_leaf[leaf].push(mode);
        }
        per_leaf.into_iter().map(ScorePrediction::from_modes).collect()
    }
}
