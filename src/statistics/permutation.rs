use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Source of spot-label permutations.
///
/// The base seed keys one ChaCha generator and permutation `k` is drawn from its stream
/// `k`, so any subset of permutations can be generated independently (and in parallel)
/// and always yields the same labels for the same seed. Neighbouring seeds give
/// unrelated keys. Only expression-side assignments are ever permuted; the spatial
/// weights stay fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permuter {
    seed: u64,
}

impl Permuter {
    /// Deterministic permutations for `Some(seed)`, a fresh random base seed otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| rand::rng().random());
        Permuter { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The `k`-th uniform shuffle of `0..n_spots`.
    pub fn permutation(&self, k: usize, n_spots: usize) -> Vec<usize> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(k as u64);
        let mut labels: Vec<usize> = (0..n_spots).collect();
        labels.shuffle(&mut rng);
        labels
    }

    /// All `n_perm` permutations, one row per permutation.
    pub fn table(&self, n_perm: usize, n_spots: usize) -> Vec<Vec<usize>> {
        (0..n_perm)
            .map(|k| self.permutation(k, n_spots))
            .collect()
    }
}
