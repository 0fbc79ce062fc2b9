//! Per-leaf bounded reservoirs of observed scene points.
//!
//! Each leaf of each tree owns one reservoir of fixed capacity. Below
//! capacity new samples are appended; once full, reservoir sampling decides
//! whether a new sample replaces a uniformly chosen slot, so every sample
//! ever offered has the same chance of being retained.
//!
//! Every reservoir sits behind its own mutex: writers routing different
//! pixels to the same leaf serialise on that leaf only, and readers always
//! copy out a consistent state.

use std::ops::Range;

use nalgebra::Vector3;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::error::ForestError;

/// One observation stored in a reservoir (world coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReservoirSample {
    pub position: Vector3<f32>,
    pub colour: Vector3<u8>,
    /// Value of the reservoir's add counter when the sample was offered.
    pub added_at: u64,
}

/// Serializable contents of one reservoir.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservoirState {
    pub samples: Vec<ReservoirSample>,
    pub add_calls: u64,
}

struct Reservoir {
    state: ReservoirState,
    rng: StdRng,
}

impl Reservoir {
    fn new(seed: u64) -> Self {
        Self {
            state: ReservoirState::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Offer a sample; returns true if it was stored.
    fn add(&mut self, capacity: usize, position: Vector3<f32>, colour: Vector3<u8>) -> bool {
        let added_at = self.state.add_calls;
        self.state.add_calls += 1;

        let sample = ReservoirSample {
            position,
            colour,
            added_at,
        };

        if self.state.samples.len() < capacity {
            self.state.samples.push(sample);
            return true;
        }

        let slot = self.rng.gen_range(0..=added_at) as usize;
        if slot < capacity {
            self.state.samples[slot] = sample;
            true
        } else {
            false
        }
    }
}

/// Reservoirs for every leaf of the forest, indexed by flat leaf index.
pub struct ReservoirStore {
    capacity: usize,
    seed: u64,
    reservoirs: Vec<Mutex<Reservoir>>,
}

impl ReservoirStore {
    /// Create `count` empty reservoirs of the given capacity.
    pub fn new(count: usize, capacity: usize, seed: u64) -> Self {
        Self {
            capacity,
            seed,
            reservoirs: (0..count)
                .map(|i| Mutex::new(Reservoir::new(reservoir_seed(seed, i))))
                .collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of reservoirs.
    pub fn len(&self) -> usize {
        self.reservoirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservoirs.is_empty()
    }

    fn reservoir(&self, index: usize) -> Result<&Mutex<Reservoir>, ForestError> {
        self.reservoirs
            .get(index)
            .ok_or(ForestError::ReservoirOutOfRange {
                index,
                count: self.reservoirs.len(),
            })
    }

    /// Offer a sample to reservoir `index`. Returns whether it was stored.
    pub fn add(
        &self,
        index: usize,
        position: Vector3<f32>,
        colour: Vector3<u8>,
    ) -> Result<bool, ForestError> {
        let reservoir = self.reservoir(index)?;
        Ok(reservoir.lock().add(self.capacity, position, colour))
    }

    /// Copy of the samples currently held by reservoir `index`.
    pub fn get(&self, index: usize) -> Result<Vec<ReservoirSample>, ForestError> {
        Ok(self.reservoir(index)?.lock().state.samples.clone())
    }

    /// Number of samples held by reservoir `index`.
    pub fn sample_count(&self, index: usize) -> Result<usize, ForestError> {
        Ok(self.reservoir(index)?.lock().state.samples.len())
    }

    /// Number of samples ever offered to reservoir `index`.
    pub fn add_calls(&self, index: usize) -> Result<u64, ForestError> {
        Ok(self.reservoir(index)?.lock().state.add_calls)
    }

    /// Number of reservoirs holding at least one sample.
    pub fn filled_count(&self) -> usize {
        self.reservoirs
            .iter()
            .filter(|r| !r.lock().state.samples.is_empty())
            .count()
    }

    /// Empty every reservoir and reseed its generator.
    pub fn reset(&self) {
        for (i, reservoir) in self.reservoirs.iter().enumerate() {
            *reservoir.lock() = Reservoir::new(reservoir_seed(self.seed, i));
        }
    }

    /// Empty and reseed the reservoirs in `range` only.
    pub fn reset_range(&self, range: Range<usize>) -> Result<(), ForestError> {
        if range.end > self.reservoirs.len() {
            return Err(ForestError::ReservoirOutOfRange {
                index: range.end - 1,
                count: self.reservoirs.len(),
            });
        }
        for i in range {
            *self.reservoirs[i].lock() = Reservoir::new(reservoir_seed(self.seed, i));
        }
        Ok(())
    }

    /// Copy out every reservoir, for snapshots.
    pub fn export(&self) -> Vec<ReservoirState> {
        self.reservoirs
            .iter()
            .map(|r| r.lock().state.clone())
            .collect()
    }

    /// Replace every reservoir's contents. Samples beyond capacity are dropped.
    pub fn import(&self, states: Vec<ReservoirState>) -> Result<(), ForestError> {
        if states.len() != self.reservoirs.len() {
            return Err(ForestError::InconsistentSnapshot(format!(
                "{} reservoirs for a store of {}",
                states.len(),
                self.reservoirs.len()
            )));
        }
        for (reservoir, mut state) in self.reservoirs.iter().zip(states) {
            state.samples.truncate(self.capacity);
            reservoir.lock().state = state;
        }
        Ok(())
    }
}

/// Per-reservoir seed so that each leaf draws an independent stream.
fn reservoir_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn point(i: usize) -> Vector3<f32> {
        Vector3::new(i as f32, 0.0, 0.0)
    }

    #[test]
    fn test_below_capacity_keeps_everything() {
        let store = ReservoirStore::new(2, 8, 1);
        for i in 0..5 {
            assert!(store.add(1, point(i), Vector3::new(1, 2, 3)).unwrap());
        }

        let samples = store.get(1).unwrap();
        assert_eq!(samples.len(), 5);
        for i in 0..5 {
            assert!(samples.iter().any(|s| s.position == point(i)));
        }
        assert!(store.get(0).unwrap().is_empty());
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let store = ReservoirStore::new(1, 10, 3);
        for i in 0..1000 {
            store.add(0, point(i), Vector3::zeros()).unwrap();
            assert!(store.sample_count(0).unwrap() <= 10);
        }
        assert_eq!(store.sample_count(0).unwrap(), 10);
        assert_eq!(store.add_calls(0).unwrap(), 1000);
    }

    #[test]
    fn test_every_sample_can_be_retained() {
        let capacity = 10;
        let offered = 20;
        let mut retained = vec![0usize; offered];

        for trial in 0..500 {
            let store = ReservoirStore::new(1, capacity, trial);
            for i in 0..offered {
                store.add(0, point(i), Vector3::zeros()).unwrap();
            }
            for s in store.get(0).unwrap() {
                retained[s.added_at as usize] += 1;
            }
        }

        // Expected retention is 50%; every sample must survive sometimes.
        assert!(retained.iter().all(|&n| n > 0), "{:?}", retained);
        // The first samples must not be kept deterministically either.
        assert!(retained[..capacity].iter().all(|&n| n < 500));
    }

    #[test]
    fn test_concurrent_writers_to_one_leaf() {
        let store = ReservoirStore::new(4, 64, 9);
        (0..10_000).into_par_iter().for_each(|i| {
            store.add(i % 2, point(i), Vector3::zeros()).unwrap();
        });

        assert_eq!(store.sample_count(0).unwrap(), 64);
        assert_eq!(store.sample_count(1).unwrap(), 64);
        assert_eq!(store.add_calls(0).unwrap() + store.add_calls(1).unwrap(), 10_000);
        assert_eq!(store.filled_count(), 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let store = ReservoirStore::new(3, 4, 0);
        store.add(2, point(1), Vector3::zeros()).unwrap();
        store.reset();

        assert_eq!(store.filled_count(), 0);
        assert_eq!(store.add_calls(2).unwrap(), 0);
    }

    #[test]
    fn test_out_of_range_index() {
        let store = ReservoirStore::new(3, 4, 0);
        assert!(matches!(
            store.add(3, point(0), Vector3::zeros()),
            Err(ForestError::ReservoirOutOfRange { index: 3, count: 3 })
        ));
        assert!(store.get(7).is_err());
    }

    #[test]
    fn test_reset_range_keeps_other_reservoirs() {
        let store = ReservoirStore::new(4, 4, 0);
        for i in 0..4 {
            store.add(i, point(i), Vector3::zeros()).unwrap();
        }
        store.reset_range(1..3).unwrap();

        assert_eq!(store.sample_count(0).unwrap(), 1);
        assert_eq!(store.sample_count(1).unwrap(), 0);
        assert_eq!(store.add_calls(2).unwrap(), 0);
        assert_eq!(store.sample_count(3).unwrap(), 1);
        assert!(matches!(
            store.reset_range(2..5),
            Err(ForestError::ReservoirOutOfRange { index: 4, count: 4 })
        ));
    }

    #[test]
    fn test_import_count_mismatch() {
        let store = ReservoirStore::new(2, 4, 0);
        let exported = ReservoirStore::new(3, 4, 0).export();
        assert!(matches!(
            store.import(exported),
            Err(ForestError::InconsistentSnapshot(_))
        ));
    }

    #[test]
    fn test_export_import_roundtrip() {
        let store = ReservoirStore::new(2, 4, 0);
        for i in 0..6 {
            store.add(0, point(i), Vector3::zeros()).unwrap();
        }
        let exported = store.export();

        let other = ReservoirStore::new(2, 4, 5);
        other.import(exported.clone()).unwrap();
        assert_eq!(other.export(), exported);
    }
}
