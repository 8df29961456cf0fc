//! Injected randomness abstraction (component L: Clock & RandomSource).
//!
//! [`RandomSelector`](../../wa_template/struct.RandomSelector.html) never
//! calls `rand::thread_rng()` directly — it goes through a [`RandomSource`]
//! so that selection can be made deterministic for previews, tests, and the
//! seeded-selection property (P5).

use rand::rngs::OsRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_pcg::Pcg64;
use std::sync::{Arc, Mutex};

/// Uniform integer source used by the random selector.
///
/// `uint64n(k)` draws a value uniformly from `[0, k)`. Implementations must
/// not introduce modulo bias for the ranges used by this crate (`k <= 10`).
pub trait RandomSource: Send + Sync {
    /// Draw a uniformly distributed integer in `[0, k)`.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `k == 0`; callers never pass `0`.
    fn uint64n(&self, k: u64) -> u64;
}

/// Cryptographically strong default source, backed by the OS RNG.
#[derive(Debug, Default)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn uint64n(&self, k: u64) -> u64 {
        assert!(k > 0, "uint64n called with k == 0");
        OsRng.gen_range(0..k)
    }
}

/// Deterministic source seeded from a single `u64`, used by
/// `selectWithSeed` (P5: pure function of `(blocks, seed)`).
pub struct SeededRandomSource {
    rng: Mutex<Pcg64>,
}

impl SeededRandomSource {
    /// Create a new deterministic source from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(Pcg64::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn uint64n(&self, k: u64) -> u64 {
        assert!(k > 0, "uint64n called with k == 0");
        let mut rng = self.rng.lock().expect("rng lock poisoned");
        rng.next_u64() % k
    }
}

/// A shared, dynamically-dispatched random source handle.
pub type SharedRandomSource = Arc<dyn RandomSource>;
