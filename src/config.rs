//! Top-level configuration, loaded from TOML.
//!
//! Every section has defaults, so a file only needs the keys it overrides:
//!
//! ```toml
//! [forest]
//! reservoir_capacity = 512
//!
//! [backend]
//! kind = "accelerator"
//!
//! [refining]
//! save_relocalisation_poses = true
//! evaluation_mode = "benchmark"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendConfig;
use crate::clustering::ClusteringConfig;
use crate::forest::ForestConfig;
use crate::relocalisation::{RansacConfig, RefiningConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// All settings of a relocalisation session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocaliserConfig {
    pub forest: ForestConfig,
    pub clustering: ClusteringConfig,
    pub backend: BackendConfig,
    pub ransac: RansacConfig,
    pub refining: RefiningConfig,
}

impl RelocaliserConfig {
    /// Read and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &'static str, message: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                key,
                message: message.to_string(),
            })
        }

        if self.forest.reservoir_capacity == 0 {
            return invalid("forest.reservoir_capacity", "must be positive");
        }
        if !(self.clustering.sigma > 0.0) {
            return invalid("clustering.sigma", "must be positive");
        }
        if !(self.clustering.tau > 0.0) {
            return invalid("clustering.tau", "must be positive");
        }
        if self.backend.workgroup_size == 0 {
            return invalid("backend.workgroup_size", "must be positive");
        }
        if self.ransac.max_hypotheses == 0 {
            return invalid("ransac.max_hypotheses", "must be positive");
        }
        if self.refining.experiment_tag.is_empty() {
            return invalid("refining.experiment_tag", "must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::relocalisation::EvaluationMode;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RelocaliserConfig::default();

        assert_eq!(config.forest.reservoir_capacity, 1024);
        assert_eq!(config.forest.max_reservoirs_to_update, 256);
        assert_eq!(config.clustering.sigma, 0.1);
        assert_eq!(config.clustering.tau, 0.05);
        assert_eq!(config.clustering.max_cluster_count, 50);
        assert_eq!(config.clustering.min_cluster_size, 20);
        assert_eq!(config.backend.kind, BackendKind::Cpu);
        assert!(!config.refining.save_relocalisation_poses);
        assert_eq!(config.refining.experiment_tag.len(), "20260101-000000".len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_overrides() {
        let config = RelocaliserConfig::from_toml_str(
            r#"
            [forest]
            reservoir_capacity = 64

            [backend]
            kind = "accelerator"
            workgroup_size = 32

            [refining]
            save_relocalisation_poses = true
            experiment_tag = "office"
            evaluation_mode = "benchmark"
            "#,
        )
        .unwrap();

        assert_eq!(config.forest.reservoir_capacity, 64);
        assert_eq!(config.forest.max_reservoirs_to_update, 256);
        assert_eq!(config.backend.kind, BackendKind::Accelerator);
        assert_eq!(config.backend.workgroup_size, 32);
        assert_eq!(config.refining.experiment_tag, "office");
        assert_eq!(config.refining.evaluation_mode, EvaluationMode::Benchmark);
        assert_eq!(config.clustering, ClusteringConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RelocaliserConfig::from_toml_str("[clustering]\nsigma = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "clustering.sigma", .. }));

        let err = RelocaliserConfig::from_toml_str("[forest]\nreservoir_capacity = \"lots\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ransac]\nmax_hypotheses = 16").unwrap();

        let config = RelocaliserConfig::load(file.path()).unwrap();
        assert_eq!(config.ransac.max_hypotheses, 16);

        assert!(matches!(
            RelocaliserConfig::load("/nonexistent/reloc.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
