//! Seeded random source for payload synthesis.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic random number generator for reproducible fixtures.
///
/// Uses ChaCha8 so the same seed yields byte-identical files on every
/// platform.
#[derive(Debug)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
    seed: u64,
}

impl DeterministicRng {
    /// Creates deterministic RNG from seed value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// Returns the seed used for this RNG.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generates random number in range [min, max).
    pub fn random_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.rng.next_u64() % (max - min))
    }

    /// Scales `base` by a random factor in [1 - spread, 1 + spread).
    pub fn jitter(&mut self, base: usize, spread: f64) -> usize {
        let unit = self.rng.next_u64() as f64 / u64::MAX as f64;
        let factor = 1.0 - spread + 2.0 * spread * unit;
        (base as f64 * factor).round().max(0.0) as usize
    }

    pub fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_rng_reproducibility() {
        let mut rng1 = DeterministicRng::from_seed(12345);
        let mut rng2 = DeterministicRng::from_seed(12345);

        let values1: Vec<u64> = (0..10).map(|_| rng1.random_range(0, 100)).collect();
        let values2: Vec<u64> = (0..10).map(|_| rng2.random_range(0, 100)).collect();
        assert_eq!(values1, values2);

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];
        rng1.fill_bytes(&mut bytes1);
        rng2.fill_bytes(&mut bytes2);
        assert_eq!(bytes1, bytes2);
    }

    #[test]
    fn test_empty_range_returns_min() {
        let mut rng = DeterministicRng::from_seed(1);
        assert_eq!(rng.random_range(7, 7), 7);
        assert_eq!(rng.random_range(9, 3), 9);
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let mut rng = DeterministicRng::from_seed(42);
        for _ in 0..1000 {
            let value = rng.jitter(1000, 0.2);
            assert!((800..=1200).contains(&value), "{value}");
        }
        assert_eq!(rng.jitter(1000, 0.0), 1000);
    }
}
