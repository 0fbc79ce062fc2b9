//! Quick-shift density linkage over reservoir samples.
//!
//! The per-sample steps (density, parent, root) and the per-cluster steps
//! (selection, mode statistics) are plain functions of an index so both
//! backends run the exact same arithmetic in the exact same order:
//!
//! 1. density(i) = Σ_j exp(-‖x_i − x_j‖² / 2σ²), j ascending
//! 2. parent(i) = nearest dominating sample closer than τ, else i itself
//! 3. root(i) = parent chain followed to its fixed point
//! 4. roots numbered by ascending sample index
//! 5. clusters below `min_cluster_size` dropped, largest kept
//! 6. one [`Mode`] per kept cluster, members accumulated in sample order

use nalgebra::{Matrix3, Vector3};

use crate::forest::reservoir::ReservoirSample;

use super::config::ClusteringConfig;
use super::mode::{Mode, ScorePrediction, COVARIANCE_EPSILON};
use super::ExampleClusterer;
use crate::backend::ExecutionBackend;

/// Kernel density of sample `i` over all samples.
#[inline]
pub(crate) fn sample_density(samples: &[ReservoirSample], i: usize, sigma: f32) -> f32 {
    let inv_two_sigma_sq = 1.0 / (2.0 * sigma * sigma);
    let xi = samples[i].position;
    let mut density = 0.0f32;
    for s in samples {
        let d2 = (s.position - xi).norm_squared();
        density += (-d2 * inv_two_sigma_sq).exp();
    }
    density
}

/// Strict total order on samples: denser first, lower index on equal density.
#[inline]
pub(crate) fn dominates(densities: &[f32], j: usize, i: usize) -> bool {
    densities[j] > densities[i] || (densities[j] == densities[i] && j < i)
}

/// Nearest dominating sample strictly within `tau` of sample `i`, or `i`.
#[inline]
pub(crate) fn find_parent(
    samples: &[ReservoirSample],
    densities: &[f32],
    i: usize,
    tau: f32,
) -> usize {
    let xi = samples[i].position;
    let mut best = i;
    let mut best_d2 = tau * tau;
    for j in 0..samples.len() {
        if j == i || !dominates(densities, j, i) {
            continue;
        }
        let d2 = (samples[j].position - xi).norm_squared();
        if d2 < best_d2 {
            best_d2 = d2;
            best = j;
        }
    }
    best
}

/// Follow parent links from `i` to the root of its component.
#[inline]
pub(crate) fn find_root(parents: &[usize], mut i: usize) -> usize {
    while parents[i] != i {
        i = parents[i];
    }
    i
}

/// Ids of the clusters to keep, largest first, ties by lower id.
pub(crate) fn select_clusters(sizes: &[u32], config: &ClusteringConfig) -> Vec<usize> {
    let min_size = config.min_cluster_size.max(1) as u32;
    let mut kept: Vec<usize> = (0..sizes.len()).filter(|&c| sizes[c] >= min_size).collect();
    kept.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]).then(a.cmp(&b)));
    kept.truncate(config.effective_max_clusters());
    kept
}

/// Statistics of the samples whose cluster id equals `cluster`.
pub(crate) fn compute_mode(samples: &[ReservoirSample], cluster_of: &[u32], cluster: u32) -> Mode {
    let mut count = 0u32;
    let mut position_sum = Vector3::<f32>::zeros();
    let mut colour_sum = Vector3::<u32>::zeros();
    for (s, &c) in samples.iter().zip(cluster_of) {
        if c == cluster {
            count += 1;
            position_sum += s.position;
            colour_sum += s.colour.cast::<u32>();
        }
    }
    debug_assert!(count > 0);

    let n = count as f32;
    let position = position_sum / n;

    let mut covariance = Matrix3::<f32>::zeros();
    for (s, &c) in samples.iter().zip(cluster_of) {
        if c == cluster {
            let d = s.position - position;
            covariance += d * d.transpose();
        }
    }
    covariance /= n;

    let regularised = covariance + Matrix3::identity() * COVARIANCE_EPSILON;
    let determinant = regularised.determinant();
    let inverse_covariance = regularised.try_inverse().unwrap_or_else(Matrix3::identity);

    let half = count / 2;
    let colour = colour_sum.map(|c| ((c + half) / count).min(255) as u8);

    Mode {
        position,
        covariance,
        inverse_covariance,
        determinant,
        colour,
        inliers: count,
    }
}

/// Reference clusterer: cluster one reservoir sequentially.
pub fn cluster_samples(samples: &[ReservoirSample], config: &ClusteringConfig) -> Vec<Mode> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }

    let densities: Vec<f32> = (0..n)
        .map(|i| sample_density(samples, i, config.sigma))
        .collect();
    let parents: Vec<usize> = (0..n)
        .map(|i| find_parent(samples, &densities, i, config.tau))
        .collect();

    let mut root_ids = vec![u32::MAX; n];
    let mut cluster_count = 0u32;
    for i in 0..n {
        if parents[i] == i {
            root_ids[i] = cluster_count;
            cluster_count += 1;
        }
    }

    let cluster_of: Vec<u32> = (0..n).map(|i| root_ids[find_root(&parents, i)]).collect();

    let mut sizes = vec![0u32; cluster_count as usize];
    for &c in &cluster_of {
        sizes[c as usize] += 1;
    }

    select_clusters(&sizes, config)
        .into_iter()
        .map(|c| compute_mode(samples, &cluster_of, c as u32))
        .collect()
}

/// Multi-core clusterer: leaves in parallel, each clustered sequentially.
pub struct CpuExampleClusterer {
    config: ClusteringConfig,
    backend: ExecutionBackend,
}

impl CpuExampleClusterer {
    pub fn new(config: ClusteringConfig, backend: ExecutionBackend) -> Self {
        Self { config, backend }
    }
}

impl ExampleClusterer for CpuExampleClusterer {
    fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    fn find_modes(&self, reservoirs: &[Vec<ReservoirSample>]) -> Vec<ScorePrediction> {
        self.backend.map_indices(reservoirs.len(), |leaf| {
            ScorePrediction::from_modes(cluster_samples(&reservoirs[leaf], &self.config))
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::cloud;
    use super::*;
    use approx::assert_relative_eq;

    fn config(min_cluster_size: usize, max_cluster_count: usize) -> ClusteringConfig {
        ClusteringConfig {
            sigma: 0.1,
            tau: 0.05,
            max_cluster_count,
            min_cluster_size,
        }
    }

    #[test]
    fn test_two_separated_clouds() {
        let mut samples = cloud(Vector3::new(0.0, 0.0, 1.0), 40, 0.01, 1);
        samples.extend(cloud(Vector3::new(1.0, 0.0, 1.0), 25, 0.01, 2));

        let modes = cluster_samples(&samples, &config(5, 10));

        assert_eq!(modes.len(), 2);
        assert_eq!(modes[0].inliers, 40);
        assert_eq!(modes[1].inliers, 25);
        assert_relative_eq!(modes[0].position, Vector3::new(0.0, 0.0, 1.0), epsilon = 0.01);
        assert_relative_eq!(modes[1].position, Vector3::new(1.0, 0.0, 1.0), epsilon = 0.01);
        assert_eq!(modes[0].colour, Vector3::new(200, 100, 50));
    }

    #[test]
    fn test_single_point_below_min_size() {
        let samples = cloud(Vector3::zeros(), 1, 0.01, 3);
        assert!(cluster_samples(&samples, &config(2, 10)).is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster_samples(&[], &config(1, 10)).is_empty());
    }

    #[test]
    fn test_keeps_largest_clusters() {
        let mut samples = Vec::new();
        for (k, size) in [10usize, 20, 30, 15].into_iter().enumerate() {
            samples.extend(cloud(Vector3::new(k as f32, 0.0, 0.0), size, 0.01, k as u64));
        }

        let modes = cluster_samples(&samples, &config(1, 2));

        assert_eq!(modes.len(), 2);
        assert_eq!(modes[0].inliers, 30);
        assert_eq!(modes[1].inliers, 20);
        assert_relative_eq!(modes[0].position.x, 2.0, epsilon = 0.01);
        assert_relative_eq!(modes[1].position.x, 1.0, epsilon = 0.01);
    }

    #[test]
    fn test_equal_sizes_keep_first_formed() {
        let mut samples = cloud(Vector3::new(0.0, 0.0, 0.0), 10, 0.01, 1);
        samples.extend(cloud(Vector3::new(5.0, 0.0, 0.0), 10, 0.01, 2));

        let modes = cluster_samples(&samples, &config(1, 1));
        assert_eq!(modes.len(), 1);
        assert_relative_eq!(modes[0].position.x, 0.0, epsilon = 0.01);
    }

    #[test]
    fn test_small_clusters_are_dropped_as_outliers() {
        let mut samples = cloud(Vector3::zeros(), 30, 0.01, 4);
        samples.extend(cloud(Vector3::new(3.0, 3.0, 3.0), 3, 0.01, 5));

        let modes = cluster_samples(&samples, &config(5, 10));
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[0].inliers, 30);
    }

    #[test]
    fn test_identical_points_form_one_cluster() {
        let samples: Vec<ReservoirSample> = (0..8)
            .map(|i| ReservoirSample {
                position: Vector3::new(1.0, 1.0, 1.0),
                colour: Vector3::new(10, 20, 30),
                added_at: i,
            })
            .collect();

        let modes = cluster_samples(&samples, &config(1, 10));
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[0].inliers, 8);
        assert_relative_eq!(modes[0].covariance, Matrix3::zeros());
        assert!(modes[0].determinant > 0.0);
    }
}
