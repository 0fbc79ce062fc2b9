//! Modal clustering of leaf reservoirs into ranked mode lists.
//!
//! Two interchangeable backends implement [`ExampleClusterer`]:
//! - [`CpuExampleClusterer`]: leaves in parallel, each clustered sequentially
//! - [`AcceleratorExampleClusterer`]: grid kernel passes over packed buffers
//!
//! Both produce bit-identical modes for identical input.

pub mod config;
pub mod kernels;
pub mod mode;
pub mod quick_shift;

pub use config::ClusteringConfig;
pub use kernels::AcceleratorExampleClusterer;
pub use mode::{Mode, ScorePrediction, COVARIANCE_EPSILON, MAX_MODES};
pub use quick_shift::{cluster_samples, CpuExampleClusterer};

use crate::backend::{BackendKind, ExecutionBackend};
use crate::forest::reservoir::ReservoirSample;

/// Finds the modes of a batch of reservoirs.
pub trait ExampleClusterer: Send + Sync {
    fn config(&self) -> &ClusteringConfig;

    /// One prediction per input reservoir, in input order.
    fn find_modes(&self, reservoirs: &[Vec<ReservoirSample>]) -> Vec<ScorePrediction>;
}

/// Build the clusterer matching the backend kind.
pub fn create_clusterer(
    config: ClusteringConfig,
    backend: ExecutionBackend,
) -> Box<dyn ExampleClusterer> {
    match backend.kind() {
        BackendKind::Cpu => Box::new(CpuExampleClusterer::new(config, backend)),
        BackendKind::Accelerator => Box::new(AcceleratorExampleClusterer::new(config, backend)),
    }
}

#[cfg(test)]
mod tests {
    use super::quick_shift::test_support::cloud;
    use super::*;
    use crate::backend::{AcceleratorBackend, CpuBackend};
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_reservoirs(seed: u64) -> Vec<Vec<ReservoirSample>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..17)
            .map(|leaf| {
                let mut samples = Vec::new();
                for c in 0..rng.gen_range(0..4) {
                    let centre = Vector3::new(
                        rng.gen_range(-2.0..2.0),
                        rng.gen_range(-2.0..2.0),
                        rng.gen_range(0.5..4.0),
                    );
                    let count = rng.gen_range(1..60);
                    samples.extend(cloud(centre, count, 0.03, seed ^ (leaf * 7 + c) as u64));
                }
                // Mixed colours so rounding is exercised.
                for s in samples.iter_mut() {
                    s.colour = Vector3::new(rng.gen(), rng.gen(), rng.gen());
                }
                samples
            })
            .collect()
    }

    #[test]
    fn test_backends_produce_identical_modes() {
        let config = ClusteringConfig {
            min_cluster_size: 3,
            max_cluster_count: 4,
            ..Default::default()
        };
        let cpu = CpuExampleClusterer::new(config.clone(), ExecutionBackend::default());
        let accel = AcceleratorExampleClusterer::new(
            config,
            ExecutionBackend::Accelerator(AcceleratorBackend::new(16, 3)),
        );

        for seed in 0..4 {
            let reservoirs = random_reservoirs(seed);
            let a = cpu.find_modes(&reservoirs);
            let b = accel.find_modes(&reservoirs);
            assert_eq!(a.len(), reservoirs.len());
            assert_eq!(a, b, "backends diverged for seed {seed}");
        }
    }

    #[test]
    fn test_factory_follows_backend_kind() {
        let cpu = create_clusterer(
            ClusteringConfig::default(),
            ExecutionBackend::Cpu(CpuBackend::global()),
        );
        let accel = create_clusterer(
            ClusteringConfig::default(),
            ExecutionBackend::Accelerator(AcceleratorBackend::default()),
        );
        let reservoirs = vec![cloud(Vector3::new(0.0, 0.0, 1.0), 30, 0.01, 9), Vec::new()];

        let a = cpu.find_modes(&reservoirs);
        let b = accel.find_modes(&reservoirs);
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 1);
        assert!(a[1].is_empty());
    }

    #[test]
    fn test_empty_batch() {
        let accel = AcceleratorExampleClusterer::new(
            ClusteringConfig::default(),
            ExecutionBackend::Accelerator(AcceleratorBackend::default()),
        );
        assert!(accel.find_modes(&[]).is_empty());
        assert_eq!(accel.find_modes(&[Vec::new(), Vec::new()]).len(), 2);
    }
}
