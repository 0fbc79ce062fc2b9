//! Accelerator-style backend: grid dispatch of fixed-size workgroups.
//!
//! Kernels are launched over a 1D grid of `ceil(n / workgroup_size)`
//! workgroups. Worker threads claim whole workgroups from an atomic counter
//! and run one invocation per index, so each invocation owns exactly one
//! output slot and no invocation observes another's result within a pass.
//! Completed workgroups are sent back over a channel and stitched into a
//! dense output buffer in index order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::unbounded;

/// Workgroup-dispatch backend.
#[derive(Debug, Clone)]
pub struct AcceleratorBackend {
    workgroup_size: usize,
    workers: usize,
}

impl AcceleratorBackend {
    /// Create a backend with the given workgroup size and worker count
    /// (0 workers = one per available core).
    pub fn new(workgroup_size: usize, workers: usize) -> Self {
        let workers = if workers == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers
        };
        Self {
            workgroup_size: workgroup_size.max(1),
            workers,
        }
    }

    pub fn workgroup_size(&self) -> usize {
        self.workgroup_size
    }

    /// Launch `kernel` once per index in `0..n`.
    pub fn dispatch<T, F>(&self, n: usize, kernel: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync,
    {
        if n == 0 {
            return Vec::new();
        }

        let group_count = n.div_ceil(self.workgroup_size);
        let next_group = AtomicUsize::new(0);
        let (tx, rx) = unbounded::<(usize, Vec<T>)>();

        thread::scope(|s| {
            for _ in 0..self.workers.min(group_count) {
                let tx = tx.clone();
                let next_group = &next_group;
                let kernel = &kernel;
                let wg = self.workgroup_size;
                s.spawn(move || loop {
                    let group = next_group.fetch_add(1, Ordering::Relaxed);
                    if group >= group_count {
                        break;
                    }
                    let start = group * wg;
                    let end = (start + wg).min(n);
                    let out: Vec<T> = (start..end).map(kernel).collect();
                    if tx.send((group, out)).is_err() {
                        break;
                    }
                });
            }
        });
        drop(tx);

        let mut groups: Vec<Option<Vec<T>>> = (0..group_count).map(|_| None).collect();
        for (group, out) in rx.try_iter() {
            groups[group] = Some(out);
        }
        groups.into_iter().flatten().flatten().collect()
    }
}

impl Default for AcceleratorBackend {
    fn default() -> Self {
        Self::new(64, 0)
    }
}
