//! Multi-core backend: rayon data parallelism over the index range.

use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::prelude::*;

/// Rayon-backed backend, either on the global pool or a dedicated one.
#[derive(Debug, Clone)]
pub struct CpuBackend {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl CpuBackend {
    /// Use a dedicated pool of `threads` workers (0 = rayon's global pool).
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Ok(Self::global());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("reloc-cpu-{}", i))
            .build()
            .context("Failed to build CPU backend thread pool")?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    /// Backend running on rayon's global pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    pub fn map_indices<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync,
    {
        match &self.pool {
            Some(pool) => pool.install(|| (0..n).into_par_iter().map(&f).collect()),
            None => (0..n).into_par_iter().map(&f).collect(),
        }
    }
}
