//! Shared random source for failure injection and readout noise.
//!
//! Seeded sources replay the same sequence, which keeps chaos tests stable.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub struct MockRng {
    seed: Option<u64>,
    state: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// `None` draws the seed from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let state = seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);
        Self {
            seed,
            state: Mutex::new(state),
        }
    }

    /// The fixed seed, if any.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Bernoulli draw. Rates outside `(0, 1)` are decided without consuming
    /// randomness.
    pub fn chance(&self, rate: f64) -> bool {
        match rate {
            r if r.is_nan() || r <= 0.0 => false,
            r if r >= 1.0 => true,
            r => self.state.lock().gen_bool(r),
        }
    }

    /// Uniform jitter in `[-amplitude, amplitude)`.
    pub fn jitter(&self, amplitude: f64) -> f64 {
        if amplitude > 0.0 {
            self.state.lock().gen_range(-amplitude..amplitude)
        } else {
            0.0
        }
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_failures() {
        let a = MockRng::new(Some(7));
        let b = MockRng::new(Some(7));
        let xs: Vec<bool> = (0..32).map(|_| a.chance(0.5)).collect();
        let ys: Vec<bool> = (0..32).map(|_| b.chance(0.5)).collect();
        assert_eq!(xs, ys);
        assert_eq!(a.seed(), Some(7));
    }

    #[test]
    fn degenerate_rates_and_amplitudes() {
        let rng = MockRng::new(Some(1));
        assert!(!rng.chance(0.0));
        assert!(!rng.chance(f64::NAN));
        assert!(rng.chance(1.0));
        assert_eq!(rng.jitter(0.0), 0.0);
        assert!((-2.0..2.0).contains(&rng.jitter(2.0)));
    }
}
