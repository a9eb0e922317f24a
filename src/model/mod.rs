//! Model storage fed by the trainer.
//!
//! The trainer never builds trees itself: after a block of trees has been
//! grown it hands the finished per-level node records to a [`ModelManager`]
//! and later asks it for per-tree responses when scoring out-of-bag rows.
//!
//! - [`ModelManager`] - The storage contract
//! - [`Forest`] - Default in-memory implementation
//! - [`Tree`] - Structure-of-arrays tree storage
//! - [`persist`] - Versioned JSON schema for forests

mod forest;
pub mod persist;
mod tree;

use serde::{Deserialize, Serialize};

pub use forest::Forest;
pub use tree::{NodeId, Tree, TreeBuilder};

/// Split feature / split bin marker of a leaf.
pub const LEAF_MARK: u32 = u32::MAX;

/// Errors raised while ingesting level records.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("level {level} has {got} nodes, but the previous level split {expected_splits} nodes")]
    MalformedLevel {
        level: usize,
        got: usize,
        expected_splits: usize,
    },

    #[error("level {level}, node {node}: tree index {tree} is outside the block of {tree_count} trees")]
    TreeOutOfRange {
        level: usize,
        node: usize,
        tree: u32,
        tree_count: usize,
    },

    #[error("level {level}, node {node}: child belongs to tree {child_tree}, parent to tree {parent_tree}")]
    TreeMismatch {
        level: usize,
        node: usize,
        child_tree: u32,
        parent_tree: u32,
    },

    #[error("level {level}, node {node}: split feature {feature} has no border table")]
    UnknownFeature {
        level: usize,
        node: usize,
        feature: u32,
    },

    #[error("tree {tree} of the block has no root")]
    MissingRoot { tree: usize },
}

/// One finished node as handed to the model manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Tree index within the block.
    pub tree: u32,
    /// Split feature, [`LEAF_MARK`] for leaves.
    pub split_feature: u32,
    /// Rows with `bin <= split_bin` go left; [`LEAF_MARK`] for leaves.
    pub split_bin: u32,
    /// Majority class (classification) or mean response (regression).
    pub response: f64,
    /// Class histogram of the node's rows; empty for regression.
    pub class_counts: Vec<u64>,
    /// Node impurity (Gini or variance).
    pub impurity: f64,
    /// Rows of the node across all workers.
    pub row_count: u64,
    /// Impurity decrease of the chosen split; 0 for leaves.
    pub impurity_decrease: f64,
}

impl NodeRecord {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.split_feature == LEAF_MARK
    }
}

/// All nodes of one level of a tree block.
///
/// Nodes are ordered by tree, then by position in the tree. The `k`-th split
/// node of a level owns nodes `2k` (left) and `2k + 1` (right) of the next
/// level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelRecord {
    pub nodes: Vec<NodeRecord>,
}

impl LevelRecord {
    /// Number of split (non-leaf) nodes.
    pub fn n_splits(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_leaf()).count()
    }
}

/// Storage for trained trees.
pub trait ModelManager: Sync {
    /// Ingest a finished block of `tree_count` trees, given level by level.
    ///
    /// `bin_borders[f][b]` is the upper border of bin `b` of feature `f`;
    /// it turns split bins into raw-value thresholds.
    fn add_tree_block(
        &mut self,
        levels: &[LevelRecord],
        bin_borders: &[Vec<f64>],
        tree_count: usize,
    ) -> Result<(), ModelError>;

    /// Response of one tree for a row of bin codes: the leaf's class id
    /// (classification) or mean (regression).
    fn get_tree_response(&self, tree_index: usize, bin_row: &[u32]) -> f64;

    /// Number of trees ingested so far.
    fn n_trees(&self) -> usize;
}
