//! Structure-of-arrays tree storage and its builder.

use super::{NodeRecord, LEAF_MARK};

/// Node index within a tree (0 = root).
pub type NodeId = u32;

// ============================================================================
// Tree
// ============================================================================

/// Immutable structure-of-arrays tree.
///
/// Splits are kept in both forms: the split bin (for binned rows) and the
/// raw-value threshold `borders[feature][bin]` (for raw rows). A row goes left
/// iff `bin <= split_bin`, equivalently `value <= threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    split_features: Box<[u32]>,
    split_bins: Box<[u32]>,
    thresholds: Box<[f64]>,
    left_children: Box<[NodeId]>,
    right_children: Box<[NodeId]>,
    responses: Box<[f64]>,
    /// `n_nodes * n_classes` class frequencies, empty for regression.
    probabilities: Box<[f64]>,
    impurities: Box<[f64]>,
    row_counts: Box<[u64]>,
    impurity_decreases: Box<[f64]>,
    n_classes: u32,
}

impl Tree {
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.split_features.len()
    }

    #[inline]
    pub fn n_classes(&self) -> u32 {
        self.n_classes
    }

    #[inline]
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.split_features[node as usize] == LEAF_MARK
    }

    #[inline]
    pub fn split_feature(&self, node: NodeId) -> u32 {
        self.split_features[node as usize]
    }

    #[inline]
    pub fn split_bin(&self, node: NodeId) -> u32 {
        self.split_bins[node as usize]
    }

    #[inline]
    pub fn threshold(&self, node: NodeId) -> f64 {
        self.thresholds[node as usize]
    }

    #[inline]
    pub fn left_child(&self, node: NodeId) -> NodeId {
        self.left_children[node as usize]
    }

    #[inline]
    pub fn right_child(&self, node: NodeId) -> NodeId {
        self.right_children[node as usize]
    }

    /// Majority class or mean of the node's rows.
    #[inline]
    pub fn response(&self, node: NodeId) -> f64 {
        self.responses[node as usize]
    }

    /// Class frequencies of a node; empty for regression trees.
    pub fn class_probabilities(&self, node: NodeId) -> &[f64] {
        let k = self.n_classes as usize;
        if k == 0 {
            return &[];
        }
        let start = node as usize * k;
        &self.probabilities[start..start + k]
    }

    #[inline]
    pub fn impurity(&self, node: NodeId) -> f64 {
        self.impurities[node as usize]
    }

    #[inline]
    pub fn row_count(&self, node: NodeId) -> u64 {
        self.row_counts[node as usize]
    }

    #[inline]
    pub fn impurity_decrease(&self, node: NodeId) -> f64 {
        self.impurity_decreases[node as usize]
    }

    /// Leaf reached by a row of bin codes.
    pub fn leaf_for_bins(&self, bins: &[u32]) -> NodeId {
        let mut node = 0;
        while !self.is_leaf(node) {
            let i = node as usize;
            node = if bins[self.split_features[i] as usize] <= self.split_bins[i] {
                self.left_children[i]
            } else {
                self.right_children[i]
            };
        }
        node
    }

    /// Leaf reached by a row of raw feature values.
    pub fn leaf_for_values(&self, values: &[f64]) -> NodeId {
        let mut node = 0;
        while !self.is_leaf(node) {
            let i = node as usize;
            node = if values[self.split_features[i] as usize] <= self.thresholds[i] {
                self.left_children[i]
            } else {
                self.right_children[i]
            };
        }
        node
    }

    pub fn n_leaves(&self) -> usize {
        (0..self.n_nodes() as NodeId).filter(|&n| self.is_leaf(n)).count()
    }

    /// Number of edges on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut stack = vec![(0 as NodeId, 0usize)];
        while let Some((node, d)) = stack.pop() {
            depth = depth.max(d);
            if !self.is_leaf(node) {
                stack.push((self.left_child(node), d + 1));
                stack.push((self.right_child(node), d + 1));
            }
        }
        depth
    }

    /// Sum of split impurity decreases per feature, accumulated into `out`.
    pub fn accumulate_impurity_decrease(&self, out: &mut [f64]) {
        for i in 0..self.n_nodes() {
            let f = self.split_features[i];
            if f != LEAF_MARK {
                out[f as usize] += self.impurity_decreases[i];
            }
        }
    }
}

// ============================================================================
// TreeBuilder
// ============================================================================

/// Incremental builder: nodes are pushed in breadth-first order and children
/// are linked afterwards.
#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    split_features: Vec<u32>,
    split_bins: Vec<u32>,
    thresholds: Vec<f64>,
    left_children: Vec<NodeId>,
    right_children: Vec<NodeId>,
    responses: Vec<f64>,
    probabilities: Vec<f64>,
    impurities: Vec<f64>,
    row_counts: Vec<u64>,
    impurity_decreases: Vec<f64>,
    n_classes: u32,
}

impl TreeBuilder {
    /// Builder for a tree with `n_classes` classes (0 for regression).
    pub fn new(n_classes: u32) -> Self {
        Self {
            n_classes,
            ..Default::default()
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.split_features.len()
    }

    /// Append a node; `threshold` is stored as 0 for leaves.
    pub fn push(&mut self, record: &NodeRecord, threshold: f64) -> NodeId {
        let id = self.n_nodes() as NodeId;
        let leaf = record.is_leaf();
        self.split_features.push(record.split_feature);
        self.split_bins.push(if leaf { LEAF_MARK } else { record.split_bin });
        self.thresholds.push(if leaf { 0.0 } else { threshold });
        self.left_children.push(id);
        self.right_children.push(id);
        self.responses.push(record.response);
        self.impurities.push(record.impurity);
        self.row_counts.push(record.row_count);
        self.impurity_decreases
            .push(if leaf { 0.0 } else { record.impurity_decrease });

        if self.n_classes > 0 {
            let total: u64 = record.class_counts.iter().sum();
            for k in 0..self.n_classes as usize {
                let c = record.class_counts.get(k).copied().unwrap_or(0);
                self.probabilities
                    .push(if total > 0 { c as f64 / total as f64 } else { 0.0 });
            }
        }
        id
    }

    /// Link a split node to its children.
    pub fn set_children(&mut self, parent: NodeId, left: NodeId, right: NodeId) {
        self.left_children[parent as usize] = left;
        self.right_children[parent as usize] = right;
    }

    pub fn build(self) -> Tree {
        Tree {
            split_features: self.split_features.into_boxed_slice(),
            split_bins: self.split_bins.into_boxed_slice(),
            thresholds: self.thresholds.into_boxed_slice(),
            left_children: self.left_children.into_boxed_slice(),
            right_children: self.right_children.into_boxed_slice(),
            responses: self.responses.into_boxed_slice(),
            probabilities: self.probabilities.into_boxed_slice(),
            impurities: self.impurities.into_boxed_slice(),
            row_counts: self.row_counts.into_boxed_slice(),
            impurity_decreases: self.impurity_decreases.into_boxed_slice(),
            n_classes: self.n_classes,
        }
    }
}

// ============================================================================
// Raw parts (persistence)
// ============================================================================

/// Flat arrays of a tree, as stored by the persistence schema.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TreeParts {
    pub split_features: Vec<u32>,
    pub split_bins: Vec<u32>,
    pub thresholds: Vec<f64>,
    pub left_children: Vec<NodeId>,
    pub right_children: Vec<NodeId>,
    pub responses: Vec<f64>,
    pub probabilities: Vec<f64>,
    pub impurities: Vec<f64>,
    pub row_counts: Vec<u64>,
    pub impurity_decreases: Vec<f64>,
    pub n_classes: u32,
}

impl From<&Tree> for TreeParts {
    fn from(tree: &Tree) -> Self {
        Self {
            split_features: tree.split_features.to_vec(),
            split_bins: tree.split_bins.to_vec(),
            thresholds: tree.thresholds.to_vec(),
            left_children: tree.left_children.to_vec(),
            right_children: tree.right_children.to_vec(),
            responses: tree.responses.to_vec(),
            probabilities: tree.probabilities.to_vec(),
            impurities: tree.impurities.to_vec(),
            row_counts: tree.row_counts.to_vec(),
            impurity_decreases: tree.impurity_decreases.to_vec(),
            n_classes: tree.n_classes,
        }
    }
}

impl TreeParts {
    /// Check array lengths and child links; returns the tree on success.
    pub fn into_tree(self) -> Result<Tree, String> {
        let n = self.split_features.len();
        if n == 0 {
            return Err("tree has no nodes".into());
        }
        let lens = [
            self.split_bins.len(),
            self.thresholds.len(),
            self.left_children.len(),
            self.right_children.len(),
            self.responses.len(),
            self.impurities.len(),
            self.row_counts.len(),
            self.impurity_decreases.len(),
        ];
        if lens.iter().any(|&l| l != n) {
            return Err(format!("node arrays disagree on length {n}"));
        }
        if self.probabilities.len() != n * self.n_classes as usize {
            return Err(format!(
                "expected {} class probabilities, got {}",
                n * self.n_classes as usize,
                self.probabilities.len()
            ));
        }
        for i in 0..n {
            if self.split_features[i] == LEAF_MARK {
                continue;
            }
            let (l, r) = (self.left_children[i] as usize, self.right_children[i] as usize);
            if l <= i || r <= i || l >= n || r >= n {
                return Err(format!("node {i} has invalid children ({l}, {r})"));
            }
        }

        Ok(Tree {
            split_features: self.split_features.into_boxed_slice(),
            split_bins: self.split_bins.into_boxed_slice(),
            thresholds: self.thresholds.into_boxed_slice(),
            left_children: self.left_children.into_boxed_slice(),
            right_children: self.right_children.into_boxed_slice(),
            responses: self.responses.into_boxed_slice(),
            probabilities: self.probabilities.into_boxed_slice(),
            impurities: self.impurities.into_boxed_slice(),
            row_counts: self.row_counts.into_boxed_slice(),
            impurity_decreases: self.impurity_decreases.into_boxed_slice(),
            n_classes: self.n_classes,
        })
    }
}
