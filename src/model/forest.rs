//! Default in-memory model manager.

use ndarray::ArrayView2;

use super::tree::{NodeId, Tree, TreeBuilder};
use super::{LevelRecord, ModelError, ModelManager};
use crate::data::BinnedTable;
use crate::training::Task;
use crate::utils::{argmax_first, Parallelism};

/// A trained random forest.
#[derive(Debug, Clone, PartialEq)]
pub struct Forest {
    task: Task,
    n_features: usize,
    trees: Vec<Tree>,
}

impl Forest {
    /// Empty forest ready to receive tree blocks.
    pub fn new(task: Task, n_features: usize) -> Self {
        Self {
            task,
            n_features,
            trees: Vec::new(),
        }
    }

    pub(crate) fn from_trees(task: Task, n_features: usize, trees: Vec<Tree>) -> Self {
        Self {
            task,
            n_features,
            trees,
        }
    }

    #[inline]
    pub fn task(&self) -> Task {
        self.task
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[inline]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    #[inline]
    pub fn tree(&self, index: usize) -> &Tree {
        &self.trees[index]
    }

    // =========================================================================
    // Prediction
    // =========================================================================

    /// Predict one row of bin codes: majority class or mean response.
    pub fn predict_binned_row(&self, bins: &[u32]) -> f64 {
        self.aggregate(|tree| tree.response(tree.leaf_for_bins(bins)))
    }

    /// Predict one row of raw feature values.
    pub fn predict_row(&self, values: &[f64]) -> f64 {
        self.aggregate(|tree| tree.response(tree.leaf_for_values(values)))
    }

    /// Mean of the leaf class frequencies over all trees.
    ///
    /// Empty for regression forests.
    pub fn predict_proba_row(&self, values: &[f64]) -> Vec<f64> {
        let k = self.task.n_classes() as usize;
        let mut proba = vec![0.0; k];
        if k == 0 || self.trees.is_empty() {
            return proba;
        }
        for tree in &self.trees {
            let leaf = tree.leaf_for_values(values);
            for (p, &q) in proba.iter_mut().zip(tree.class_probabilities(leaf)) {
                *p += q;
            }
        }
        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }

    /// Predict every row of a binned table.
    pub fn predict_binned(&self, table: &BinnedTable, parallelism: Parallelism) -> Vec<f64> {
        parallelism.maybe_par_map(0..table.n_rows(), |r| self.predict_binned_row(table.row(r)))
    }

    /// Predict every row of a `[n_rows, n_features]` raw matrix.
    pub fn predict(&self, features: ArrayView2<'_, f64>, parallelism: Parallelism) -> Vec<f64> {
        parallelism.maybe_par_map(0..features.nrows(), |r| {
            let row = features.row(r);
            match row.as_slice() {
                Some(values) => self.predict_row(values),
                None => self.predict_row(&row.to_vec()),
            }
        })
    }

    /// Sum of split impurity decreases per feature, divided by the number
    /// of trees.
    pub fn impurity_importance(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.n_features];
        for tree in &self.trees {
            tree.accumulate_impurity_decrease(&mut out);
        }
        if !self.trees.is_empty() {
            let n = self.trees.len() as f64;
            out.iter_mut().for_each(|v| *v /= n);
        }
        out
    }

    fn aggregate(&self, response: impl Fn(&Tree) -> f64) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        match self.task {
            Task::Regression => {
                let sum: f64 = self.trees.iter().map(&response).sum();
                sum / self.trees.len() as f64
            }
            Task::Classification { n_classes } => {
                let mut votes = vec![0u32; n_classes as usize];
                for tree in &self.trees {
                    let class = response(tree) as usize;
                    if let Some(v) = votes.get_mut(class) {
                        *v += 1;
                    }
                }
                argmax_first(&votes) as f64
            }
        }
    }
}

// =============================================================================
// ModelManager
// =============================================================================

impl ModelManager for Forest {
    fn add_tree_block(
        &mut self,
        levels: &[LevelRecord],
        bin_borders: &[Vec<f64>],
        tree_count: usize,
    ) -> Result<(), ModelError> {
        let mut builders: Vec<TreeBuilder> = (0..tree_count)
            .map(|_| TreeBuilder::new(self.task.n_classes()))
            .collect();
        // Split nodes of the previous level in order: (tree, node id).
        let mut pending: Vec<(u32, NodeId)> = Vec::new();

        for (level_idx, level) in levels.iter().enumerate() {
            if level_idx > 0 && level.nodes.len() != 2 * pending.len() {
                return Err(ModelError::MalformedLevel {
                    level: level_idx,
                    got: level.nodes.len(),
                    expected_splits: pending.len(),
                });
            }

            let mut ids = Vec::with_capacity(level.nodes.len());
            for (i, node) in level.nodes.iter().enumerate() {
                if node.tree as usize >= tree_count {
                    return Err(ModelError::TreeOutOfRange {
                        level: level_idx,
                        node: i,
                        tree: node.tree,
                        tree_count,
                    });
                }
                if level_idx > 0 {
                    let parent_tree = pending[i / 2].0;
                    if parent_tree != node.tree {
                        return Err(ModelError::TreeMismatch {
                            level: level_idx,
                            node: i,
                            child_tree: node.tree,
                            parent_tree,
                        });
                    }
                }

                let threshold = if node.is_leaf() {
                    0.0
                } else {
                    bin_borders
                        .get(node.split_feature as usize)
                        .and_then(|b| b.get(node.split_bin as usize))
                        .copied()
                        .ok_or(ModelError::UnknownFeature {
                            level: level_idx,
                            node: i,
                            feature: node.split_feature,
                        })?
                };
                let builder = &mut builders[node.tree as usize];
                if level_idx == 0 && builder.n_nodes() > 0 {
                    return Err(ModelError::TreeMismatch {
                        level: 0,
                        node: i,
                        child_tree: node.tree,
                        parent_tree: node.tree,
                    });
                }
                ids.push(builder.push(node, threshold));
            }

            if level_idx > 0 {
                for (k, &(tree, parent)) in pending.iter().enumerate() {
                    builders[tree as usize].set_children(parent, ids[2 * k], ids[2 * k + 1]);
                }
            }

            pending = level
                .nodes
                .iter()
                .zip(&ids)
                .filter(|(node, _)| !node.is_leaf())
                .map(|(node, &id)| (node.tree, id))
                .collect();
        }

        if !pending.is_empty() {
            return Err(ModelError::MalformedLevel {
                level: levels.len(),
                got: 0,
                expected_splits: pending.len(),
            });
        }
        if let Some(tree) = builders.iter().position(|b| b.n_nodes() == 0) {
            return Err(ModelError::MissingRoot { tree });
        }

        self.trees.extend(builders.into_iter().map(TreeBuilder::build));
        Ok(())
    }

    fn get_tree_response(&self, tree_index: usize, bin_row: &[u32]) -> f64 {
        let tree = &self.trees[tree_index];
        tree.response(tree.leaf_for_bins(bin_row))
    }

    fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
