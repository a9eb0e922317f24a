//! Row and feature sampling for training.
//!
//! # Row Sampling
//!
//! Every tree draws `max(1, floor(fraction × global_rows))` global row ids,
//! with replacement (bootstrap) or without. All workers draw the same ids from
//! the tree's stream and keep the ones they own, so the local sample size of a
//! tree varies per worker while the forest does not depend on the number of
//! workers. Local rows never drawn are the tree's out-of-bag rows.
//!
//! # Feature Sampling
//!
//! Each node draws `features_per_node` distinct features from a stream keyed
//! by (tree, level, position). Drawing every feature skips the stream.

use crate::data::WorkerRows;
use crate::random::{RandomEngine, StreamKey};
use crate::training::split::NodeKey;

// ============================================================================
// TreeSample
// ============================================================================

/// Rows of one tree owned by this worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSample {
    /// Drawn local rows, sorted, with repeats under bootstrap.
    pub rows: Vec<u32>,
    /// Local rows never drawn, sorted.
    pub oob: Vec<u32>,
}

/// Parameters of per-tree row sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowSampler {
    worker: WorkerRows,
    n_select: usize,
    bootstrap: bool,
}

impl RowSampler {
    /// Sampler drawing `fraction` of the global rows.
    pub fn new(worker: WorkerRows, fraction: f64, bootstrap: bool) -> Self {
        let n_select = ((fraction * worker.global_rows as f64).floor() as usize).max(1);
        Self {
            worker,
            n_select,
            bootstrap,
        }
    }

    /// Global rows drawn per tree.
    #[inline]
    pub fn n_select(&self) -> usize {
        self.n_select
    }

    /// Draw the sample of global tree `tree`.
    ///
    /// `with_oob` also collects the local out-of-bag rows.
    pub fn sample(&self, engine: &RandomEngine, tree: u64, with_oob: bool) -> TreeSample {
        let global = self.worker.global_rows as u32;
        let mut stream = engine.stream(StreamKey::Bootstrap { tree });
        let draws = if self.bootstrap {
            let mut draws = Vec::with_capacity(self.n_select);
            stream.uniform_ints(self.n_select, 0, global, &mut draws);
            draws
        } else {
            stream.sample_without_replacement(global, self.n_select)
        };

        let mut rows: Vec<u32> = draws
            .iter()
            .filter_map(|&g| self.worker.to_local(g as usize))
            .collect();
        rows.sort_unstable();

        let oob = if with_oob {
            let mut drawn = vec![false; self.worker.len];
            rows.iter().for_each(|&r| drawn[r as usize] = true);
            (0..self.worker.len as u32).filter(|&r| !drawn[r as usize]).collect()
        } else {
            Vec::new()
        };

        TreeSample { rows, oob }
    }
}

// ============================================================================
// Feature sampling
// ============================================================================

/// Candidate features of a node, ascending.
pub fn sample_features(engine: &RandomEngine, key: NodeKey, n_features: usize, k: usize) -> Vec<u32> {
    if k >= n_features {
        return (0..n_features as u32).collect();
    }
    engine
        .stream(StreamKey::Features {
            tree: key.tree,
            level: key.level,
            node: key.position,
        })
        .sample_without_replacement(n_features as u32, k)
}
