//! Seeded random streams, one per purpose.

use camnet_env::{RandomSource, RandomUse};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic randomness split into independent streams.
///
/// Every stream is the same ChaCha8 key (the master seed) on a different
/// stream number, so drawing for one purpose never moves another. Turning
/// camera failures off leaves the multicast draws exactly where they were.
#[derive(Debug, Clone)]
pub struct RandomStreams {
    seed: u64,
    streams: [ChaCha8Rng; 4],
}

impl RandomStreams {
    /// Creates the stream set for `seed`.
    pub fn new(seed: u64) -> Self {
        let streams = RandomUse::ALL.map(|purpose| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(purpose.stream_id());
            rng
        });
        Self { seed, streams }
    }

    /// Number of words drawn so far from `purpose`.
    pub fn word_pos(&self, purpose: RandomUse) -> u128 {
        self.streams[purpose.stream_id() as usize].get_word_pos()
    }
}

impl RandomSource for RandomStreams {
    fn stream(&mut self, purpose: RandomUse) -> &mut dyn RngCore {
        &mut self.streams[purpose.stream_id() as usize]
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_seed_same_draws() {
        let mut a = RandomStreams::new(42);
        let mut b = RandomStreams::new(42);
        for purpose in RandomUse::ALL {
            for _ in 0..10 {
                assert_eq!(a.next_f64(purpose), b.next_f64(purpose));
            }
        }
        assert_eq!(a.seed(), 42);
    }

    #[test]
    fn test_streams_differ() {
        let mut streams = RandomStreams::new(7);
        let universal: Vec<u64> = (0..4).map(|_| streams.stream(RandomUse::Universal).next_u64()).collect();
        let mut fresh = RandomStreams::new(7);
        let error: Vec<u64> = (0..4).map(|_| fresh.stream(RandomUse::Error).next_u64()).collect();
        assert_ne!(universal, error);
    }

    #[test]
    fn test_word_pos_tracks_only_own_stream() {
        let mut streams = RandomStreams::new(3);
        streams.next_f64(RandomUse::Error);
        assert!(streams.word_pos(RandomUse::Error) > 0);
        assert_eq!(streams.word_pos(RandomUse::Communication), 0);
    }

    proptest! {
        #[test]
        fn prop_error_draws_do_not_perturb_communication(seed in any::<u64>(), noise in 0usize..50) {
            let mut quiet = RandomStreams::new(seed);
            let mut noisy = RandomStreams::new(seed);
            for _ in 0..noise {
                noisy.next_f64(RandomUse::Error);
                noisy.next_below(17, RandomUse::Universal);
            }
            for _ in 0..8 {
                prop_assert_eq!(
                    quiet.next_f64(RandomUse::Communication),
                    noisy.next_f64(RandomUse::Communication)
                );
            }
        }
    }
}
