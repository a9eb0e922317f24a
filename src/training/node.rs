//! Per-level node table.
//!
//! One entry per (tree, position) of the current level of a tree block,
//! stored as parallel arrays. Entries are ordered by tree and, within a tree,
//! by position, and a node's tree never changes across levels.

pub use crate::model::LEAF_MARK;

/// Read-only copy of one node entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub row_offset: usize,
    pub local_row_count: usize,
    pub global_row_count: u64,
    pub split_feature: u32,
    pub split_bin: u32,
    pub left_local_row_count: usize,
    pub left_global_row_count: u64,
    pub winning_class: u32,
    pub impurity_decrease: f64,
    pub tree: u32,
    pub tree_position: u64,
}

/// The split chosen for a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitChoice {
    pub feature: u32,
    pub bin: u32,
    pub left_local_row_count: usize,
    pub left_global_row_count: u64,
    pub impurity_decrease: f64,
}

/// Nodes of one level, struct-of-arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeList {
    row_offset: Vec<usize>,
    local_row_count: Vec<usize>,
    global_row_count: Vec<u64>,
    split_feature: Vec<u32>,
    split_bin: Vec<u32>,
    left_local_row_count: Vec<usize>,
    left_global_row_count: Vec<u64>,
    winning_class: Vec<u32>,
    impurity_decrease: Vec<f64>,
    /// Owning tree of each node (index within the block).
    node_tree: Vec<u32>,
    /// Position within its tree's level: root is 0, children of `p` are
    /// `2p` and `2p + 1`.
    tree_position: Vec<u64>,
}

impl NodeList {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            row_offset: Vec::with_capacity(n),
            local_row_count: Vec::with_capacity(n),
            global_row_count: Vec::with_capacity(n),
            split_feature: Vec::with_capacity(n),
            split_bin: Vec::with_capacity(n),
            left_local_row_count: Vec::with_capacity(n),
            left_global_row_count: Vec::with_capacity(n),
            winning_class: Vec::with_capacity(n),
            impurity_decrease: Vec::with_capacity(n),
            node_tree: Vec::with_capacity(n),
            tree_position: Vec::with_capacity(n),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.row_offset.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.row_offset.is_empty()
    }

    /// Append an unsplit node. It stays a leaf until a split is recorded.
    pub fn push(
        &mut self,
        tree: u32,
        tree_position: u64,
        row_offset: usize,
        local_row_count: usize,
        global_row_count: u64,
        winning_class: u32,
    ) -> usize {
        let id = self.len();
        self.row_offset.push(row_offset);
        self.local_row_count.push(local_row_count);
        self.global_row_count.push(global_row_count);
        self.split_feature.push(LEAF_MARK);
        self.split_bin.push(LEAF_MARK);
        self.left_local_row_count.push(0);
        self.left_global_row_count.push(0);
        self.winning_class.push(winning_class);
        self.impurity_decrease.push(0.0);
        self.node_tree.push(tree);
        self.tree_position.push(tree_position);
        id
    }

    /// Record the split of node `i`.
    pub fn set_split(&mut self, i: usize, split: &SplitChoice) {
        self.split_feature[i] = split.feature;
        self.split_bin[i] = split.bin;
        self.left_local_row_count[i] = split.left_local_row_count;
        self.left_global_row_count[i] = split.left_global_row_count;
        self.impurity_decrease[i] = split.impurity_decrease;
    }

    #[inline]
    pub fn node(&self, i: usize) -> Node {
        Node {
            row_offset: self.row_offset[i],
            local_row_count: self.local_row_count[i],
            global_row_count: self.global_row_count[i],
            split_feature: self.split_feature[i],
            split_bin: self.split_bin[i],
            left_local_row_count: self.left_local_row_count[i],
            left_global_row_count: self.left_global_row_count[i],
            winning_class: self.winning_class[i],
            impurity_decrease: self.impurity_decrease[i],
            tree: self.node_tree[i],
            tree_position: self.tree_position[i],
        }
    }

    #[inline]
    pub fn row_range(&self, i: usize) -> std::ops::Range<usize> {
        self.row_offset[i]..self.row_offset[i] + self.local_row_count[i]
    }

    #[inline]
    pub fn tree(&self, i: usize) -> u32 {
        self.node_tree[i]
    }

    #[inline]
    pub fn tree_position(&self, i: usize) -> u64 {
        self.tree_position[i]
    }
}
