//! Seeded random number generator for reproducible simulations.
//!
//! All random decisions of the network model (drop draws, clock offsets,
//! default link latencies, node choice) go through one shared RNG so that a
//! given seed replays the same topology.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// Seeded generator shared by every clone of a [`Simulator`](super::Simulator).
///
/// A replay is identical only if draws happen in the same order.
#[derive(Clone)]
pub struct SimulationRng {
    inner: Arc<Mutex<SmallRng>>,
    seed: u64,
}

impl SimulationRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SmallRng::seed_from_u64(seed))),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// True with `probability`; values outside of [0, 1] never touch the generator.
    pub fn gen_bool(&self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.inner.lock().gen_bool(probability)
    }

    /// Uniform value in [0, 1).
    pub fn gen_f64(&self) -> f64 {
        self.inner.lock().gen::<f64>()
    }

    /// Uniform value in [0, max).
    pub fn gen_up_to(&self, max: f64) -> f64 {
        self.gen_f64() * max
    }

    /// Uniform value in [-bound, bound).
    pub fn gen_symmetric(&self, bound: f64) -> f64 {
        (self.gen_f64() * 2.0 - 1.0) * bound
    }

    pub fn gen_range(&self, range: std::ops::Range<usize>) -> usize {
        self.inner.lock().gen_range(range)
    }

    /// Uniformly picked element, `None` for an empty slice.
    pub fn choose<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            let idx = self.gen_range(0..items.len());
            Some(&items[idx])
        }
    }
}

impl std::fmt::Debug for SimulationRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRng")
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}
