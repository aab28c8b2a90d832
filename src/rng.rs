//! Explicit, splittable random keys.
//!
//! Every stochastic operation in the pipeline receives its own [`PrngKey`] and
//! consumes it. Keys are neither `Clone` nor `Copy`, so a key can be split or
//! turned into a generator exactly once; the same root key and the same
//! sequence of splits always reproduce the same streams.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};

const SEED_LEN: usize = 32;

/// Domain tag mixed into the seed before deriving children, so that the
/// children of a key never share a stream with [`PrngKey::into_rng`].
const SPLIT_TAG: u8 = 0xA5;

/// A single-use random key.
#[derive(Debug, PartialEq, Eq)]
pub struct PrngKey {
    seed: [u8; SEED_LEN],
}

impl PrngKey {
    /// Creates a root key from an integer seed.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::draw(&mut rng)
    }

    /// Splits this key into two independent keys.
    pub fn split(self) -> (PrngKey, PrngKey) {
        let mut rng = self.split_rng();
        let a = Self::draw(&mut rng);
        let b = Self::draw(&mut rng);
        (a, b)
    }

    /// Splits this key into three independent keys.
    pub fn split3(self) -> (PrngKey, PrngKey, PrngKey) {
        let mut rng = self.split_rng();
        let a = Self::draw(&mut rng);
        let b = Self::draw(&mut rng);
        let c = Self::draw(&mut rng);
        (a, b, c)
    }

    /// Splits this key into `n` independent keys (one per batch lane, say).
    pub fn split_n(self, n: usize) -> Vec<PrngKey> {
        let mut rng = self.split_rng();
        (0..n).map(|_| Self::draw(&mut rng)).collect()
    }

    /// Consumes the key and returns a generator seeded from it.
    pub fn into_rng(self) -> StdRng {
        StdRng::from_seed(self.seed)
    }

    /// Consumes the key and returns a uniformly random permutation of `0..n`.
    pub fn permutation(self, n: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut self.into_rng());
        indices
    }

    fn split_rng(self) -> StdRng {
        let mut seed = self.seed;
        seed[0] ^= SPLIT_TAG;
        StdRng::from_seed(seed)
    }

    fn draw(rng: &mut StdRng) -> PrngKey {
        let mut seed = [0u8; SEED_LEN];
        rng.fill_bytes(&mut seed);
        PrngKey { seed }
    }
}
