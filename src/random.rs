//! Deterministic random streams.
//!
//! Every random decision in training draws from a stream derived from the
//! forest seed and a [`StreamKey`] naming the decision (tree bootstrap, node
//! feature subset, random split threshold, permutation). Streams never depend
//! on the order in which trees, nodes or features are processed, so the
//! forest is identical regardless of tree-block size, thread count or worker
//! count.

use rand::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;
const MIX_A: u64 = 0x517C_C1B7_2722_0A95;

/// Names one independent random decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKey {
    /// Bootstrap rows of a tree.
    Bootstrap { tree: u64 },
    /// Feature subset of a node.
    Features { tree: u64, level: u32, node: u64 },
    /// Random threshold of one candidate feature of a node.
    RandomSplit {
        tree: u64,
        level: u32,
        node: u64,
        feature: u32,
    },
    /// Permutation of one feature over a tree's out-of-bag rows.
    Permutation { tree: u64, feature: u32 },
}

impl StreamKey {
    fn words(&self) -> [u64; 5] {
        match *self {
            Self::Bootstrap { tree } => [1, tree, 0, 0, 0],
            Self::Features { tree, level, node } => [2, tree, level as u64, node, 0],
            Self::RandomSplit {
                tree,
                level,
                node,
                feature,
            } => [3, tree, level as u64, node, feature as u64],
            Self::Permutation { tree, feature } => [4, tree, 0, 0, feature as u64],
        }
    }
}

/// splitmix64 finalizer.
#[inline]
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Factory of keyed random streams for one training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomEngine {
    seed: u64,
}

impl RandomEngine {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Open the stream for `key`.
    pub fn stream(&self, key: StreamKey) -> RandomStream {
        let mut state = mix64(self.seed ^ GOLDEN);
        for (i, word) in key.words().iter().enumerate() {
            state = mix64(state ^ word.wrapping_mul(MIX_A).wrapping_add((i as u64).wrapping_mul(GOLDEN)));
        }
        RandomStream {
            rng: Xoshiro256PlusPlus::seed_from_u64(state),
        }
    }
}

/// A single random stream.
#[derive(Debug, Clone)]
pub struct RandomStream {
    rng: Xoshiro256PlusPlus,
}

impl RandomStream {
    /// `n` uniform integers in `[low, high)`, appended to `out`.
    pub fn uniform_ints(&mut self, n: usize, low: u32, high: u32, out: &mut Vec<u32>) {
        out.reserve(n);
        for _ in 0..n {
            out.push(self.rng.gen_range(low..high));
        }
    }

    /// Uniform float in `[0, 1)`.
    #[inline]
    pub fn uniform_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Sample `k` items from `0..n` without replacement.
    ///
    /// Returns sorted indices for cache-friendly access. `k >= n` returns
    /// every index.
    pub fn sample_without_replacement(&mut self, n: u32, k: usize) -> Vec<u32> {
        let mut indices: Vec<u32> = (0..n).collect();
        if k >= n as usize {
            return indices;
        }

        // Partial Fisher-Yates shuffle
        for i in 0..k {
            let j = self.rng.gen_range(i..n as usize);
            indices.swap(i, j);
        }

        indices.truncate(k);
        indices.sort_unstable();
        indices
    }

    /// Shuffle a slice in place.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}
