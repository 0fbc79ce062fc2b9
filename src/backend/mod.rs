//! Execution backends for the data-parallel parts of the pipeline.
//!
//! Every per-pixel and per-leaf algorithm in this crate is written once as a
//! function of an index and handed to [`ExecutionBackend::map_indices`]. The
//! two backends differ only in how they schedule those invocations:
//!
//! - [`CpuBackend`]: rayon work-stealing over the index range
//! - [`AcceleratorBackend`]: a grid of fixed-size workgroups, one logical
//!   invocation per index, each writing only its own output slot
//!
//! Output order is always index order, so results do not depend on the
//! backend or on the number of worker threads.

pub mod accelerator;
pub mod cpu;

use serde::{Deserialize, Serialize};

pub use accelerator::AcceleratorBackend;
pub use cpu::CpuBackend;

/// Which backend to build from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Cpu,
    Accelerator,
}

/// Backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Worker threads; 0 means one per available core.
    pub threads: usize,
    /// Invocations per workgroup for the accelerator backend.
    pub workgroup_size: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Cpu,
            threads: 0,
            workgroup_size: 64,
        }
    }
}

/// A configured backend.
#[derive(Debug, Clone)]
pub enum ExecutionBackend {
    Cpu(CpuBackend),
    Accelerator(AcceleratorBackend),
}

impl ExecutionBackend {
    /// Build the backend described by `config`.
    pub fn from_config(config: &BackendConfig) -> anyhow::Result<Self> {
        Ok(match config.kind {
            BackendKind::Cpu => Self::Cpu(CpuBackend::new(config.threads)?),
            BackendKind::Accelerator => Self::Accelerator(AcceleratorBackend::new(
                config.workgroup_size,
                config.threads,
            )),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Cpu(_) => BackendKind::Cpu,
            Self::Accelerator(_) => BackendKind::Accelerator,
        }
    }

    /// Evaluate `f(i)` for every `i` in `0..n` and collect in index order.
    pub fn map_indices<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync,
    {
        match self {
            Self::Cpu(b) => b.map_indices(n, f),
            Self::Accelerator(b) => b.dispatch(n, f),
        }
    }

    /// Run `f(i)` for every `i` in `0..n` for its side effects.
    pub fn for_each_index<F>(&self, n: usize, f: F)
    where
        F: Fn(usize) + Sync,
    {
        self.map_indices(n, f);
    }
}

impl Default for ExecutionBackend {
    fn default() -> Self {
        Self::Cpu(CpuBackend::global())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> Vec<ExecutionBackend> {
        vec![
            ExecutionBackend::Cpu(CpuBackend::global()),
            ExecutionBackend::Accelerator(AcceleratorBackend::new(7, 3)),
        ]
    }

    #[test]
    fn test_map_indices_preserves_order() {
        for backend in backends() {
            let out = backend.map_indices(1000, |i| i * 2);
            assert_eq!(out.len(), 1000);
            assert!(out.iter().enumerate().all(|(i, &v)| v == i * 2));
        }
    }

    #[test]
    fn test_map_indices_empty_range() {
        for backend in backends() {
            let out: Vec<usize> = backend.map_indices(0, |i| i);
            assert!(out.is_empty());
        }
    }

    #[test]
    fn test_backend_config_from_toml() {
        let cfg: BackendConfig = toml::from_str("kind = \"accelerator\"\nworkgroup_size = 128").unwrap();
        assert_eq!(cfg.kind, BackendKind::Accelerator);
        assert_eq!(cfg.workgroup_size, 128);
        assert_eq!(cfg.threads, 0);

        let backend = ExecutionBackend::from_config(&cfg).unwrap();
        assert_eq!(backend.kind(), BackendKind::Accelerator);
    }
}
