//! Clustering parameters.

use serde::{Deserialize, Serialize};

use super::mode::MAX_MODES;

/// Parameters of the density-linkage clusterer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Kernel bandwidth of the density estimate (metres).
    pub sigma: f32,
    /// Maximum link distance to a denser neighbour (metres).
    pub tau: f32,
    /// Maximum number of modes kept per leaf (clamped to `MAX_MODES`).
    pub max_cluster_count: usize,
    /// Clusters with fewer members are discarded as outliers.
    pub min_cluster_size: usize,
}

impl ClusteringConfig {
    /// `max_cluster_count` clamped to what a prediction can hold.
    pub fn effective_max_clusters(&self) -> usize {
        self.max_cluster_count.min(MAX_MODES)
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            sigma: 0.1,
            tau: 0.05,
            max_cluster_count: MAX_MODES,
            min_cluster_size: 20,
        }
    }
}
