//! Random-stream contract shared by agents, policies and the engine.

use crate::types::RandomUse;
use rand::{Rng, RngCore};

/// Source of reproducible randomness partitioned by purpose.
///
/// # Implementations
///
/// - **Simulation**: `RandomStreams` in `camnet_sim`, one ChaCha stream per
///   purpose derived from a single master seed
/// - **Tests**: scripted sources that return fixed draws
///
/// # Determinism
///
/// Draws for one purpose must never advance the generator of another.
pub trait RandomSource {
    /// Returns the generator backing `purpose`.
    fn stream(&mut self, purpose: RandomUse) -> &mut dyn RngCore;

    /// Returns the master seed (for logging/debugging).
    fn seed(&self) -> u64;

    /// Uniform draw in `[0, 1)`.
    fn next_f64(&mut self, purpose: RandomUse) -> f64 {
        self.stream(purpose).gen::<f64>()
    }

    /// Uniform index in `[0, n)`. Returns 0 when `n` is 0.
    fn next_below(&mut self, n: usize, purpose: RandomUse) -> usize {
        if n == 0 {
            return 0;
        }
        self.stream(purpose).gen_range(0..n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    struct Single {
        rng: ChaCha8Rng,
    }

    impl RandomSource for Single {
        fn stream(&mut self, _purpose: RandomUse) -> &mut dyn RngCore {
            &mut self.rng
        }

        fn seed(&self) -> u64 {
            7
        }
    }

    #[test]
    fn test_default_draws_in_range() {
        let mut src = Single { rng: ChaCha8Rng::seed_from_u64(7) };
        for _ in 0..100 {
            let x = src.next_f64(RandomUse::Universal);
            assert!((0.0..1.0).contains(&x));
            assert!(src.next_below(5, RandomUse::Error) < 5);
        }
        assert_eq!(src.next_below(0, RandomUse::Error), 0);
    }
}
