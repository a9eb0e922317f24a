//! Tree-block planning under a memory budget.
//!
//! Trees are grown in blocks; a block is the largest number of trees whose
//! worst-case working set fits the budget left after the binned table and
//! the response. The per-tree estimate assumes a fully balanced tree of the
//! configured depth (or one leaf per drawn row when depth is unlimited).

use crate::error::{Result, TrainError};

/// Bytes per node-list entry (offsets, counts, split, tree map, position).
const NODE_BYTES: u64 = 96;
/// Bytes per level record node, excluding class counts.
const RECORD_BYTES: u64 = 64;

/// Shape of the per-tree working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeFootprint {
    /// Local rows drawn per tree.
    pub rows: usize,
    /// 0 for unlimited.
    pub max_depth: u32,
    pub min_observations_in_split: u64,
    pub features_per_node: usize,
    pub max_bins: usize,
    /// Histogram statistics per bin.
    pub stride: usize,
    pub n_classes: usize,
}

impl TreeFootprint {
    /// Widest level of a fully balanced tree.
    pub fn max_level_width(&self) -> u64 {
        let rows = self.rows.max(1) as u64;
        if self.max_depth == 0 || self.max_depth >= 63 {
            rows
        } else {
            (1u64 << self.max_depth).min(rows)
        }
    }

    /// Worst-case bytes of one tree.
    pub fn bytes(&self) -> u64 {
        let rows = self.rows as u64;
        let width = self.max_level_width();
        let searched = (rows / self.min_observations_in_split.max(2)).clamp(1, width);

        // front and back row buffers, out-of-bag rows
        let row_order = 3 * rows * 4;
        let nodes = 2 * width * NODE_BYTES;
        let records = 2 * width * (RECORD_BYTES + 8 * self.n_classes as u64);
        let histograms = searched * (self.features_per_node * self.max_bins * self.stride * 8) as u64;
        row_order + nodes + records + histograms
    }
}

/// How the trees are split into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlan {
    pub trees_per_block: usize,
    pub n_blocks: usize,
}

impl BlockPlan {
    /// Tree index ranges of every block.
    pub fn blocks(&self, n_trees: usize) -> impl Iterator<Item = std::ops::Range<usize>> + '_ {
        let size = self.trees_per_block.max(1);
        (0..n_trees).step_by(size).map(move |start| start..(start + size).min(n_trees))
    }
}

/// Plan blocks of at most `n_trees` trees.
///
/// # Errors
///
/// [`TrainError::ResourceExhausted`] if the data and one tree exceed the
/// budget.
pub fn plan_blocks(budget_bytes: u64, data_bytes: u64, per_tree_bytes: u64, n_trees: usize) -> Result<BlockPlan> {
    let per_tree = per_tree_bytes.max(1);
    let required = data_bytes.saturating_add(per_tree);
    if budget_bytes < required {
        return Err(TrainError::ResourceExhausted {
            required,
            available: budget_bytes,
        });
    }

    let fit = ((budget_bytes - data_bytes) / per_tree).min(n_trees.max(1) as u64) as usize;
    let trees_per_block = fit.max(1);
    Ok(BlockPlan {
        trees_per_block,
        n_blocks: n_trees.div_ceil(trees_per_block),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn footprint(max_depth: u32) -> TreeFootprint {
        TreeFootprint {
            rows: 1000,
            max_depth,
            min_observations_in_split: 2,
            features_per_node: 4,
            max_bins: 32,
            stride: 2,
            n_classes: 2,
        }
    }

    #[test]
    fn test_level_width() {
        assert_eq!(footprint(0).max_level_width(), 1000);
        assert_eq!(footprint(3).max_level_width(), 8);
        assert_eq!(footprint(20).max_level_width(), 1000);
        assert!(footprint(3).bytes() < footprint(0).bytes());
    }

    #[test]
    fn test_plan_blocks() {
        let plan = plan_blocks(1_000, 100, 200, 10).unwrap();
        assert_eq!(plan, BlockPlan { trees_per_block: 4, n_blocks: 3 });
        let ranges: Vec<_> = plan.blocks(10).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);

        let plan = plan_blocks(1 << 30, 100, 200, 10).unwrap();
        assert_eq!(plan, BlockPlan { trees_per_block: 10, n_blocks: 1 });
    }

    #[test]
    fn test_budget_too_small() {
        let err = plan_blocks(250, 100, 200, 10).unwrap_err();
        assert!(matches!(
            err,
            TrainError::ResourceExhausted {
                required: 300,
                available: 250
            }
        ));
    }
}
