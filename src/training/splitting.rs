//! Node splitting: applies a level's chosen splits.
//!
//! For every split node the service
//! - records the split in the node list,
//! - partitions the node's rows (or only counts them when the children are
//!   at the depth limit and will never be searched),
//! - emits two children, left then right, packed in parent order,
//! - derives the children's global statistics: the left side from the
//!   chosen bin's cumulative histogram, the right side as parent minus left.
//!
//! The finished level is returned as a [`LevelRecord`].

use crate::data::BinnedTable;
use crate::model::{LevelRecord, NodeRecord, LEAF_MARK};
use crate::training::config::ForestConfig;
use crate::training::impurity::{ImpurityStore, Moments};
use crate::training::node::{NodeList, SplitChoice};
use crate::training::partition::{PartitionTask, RowOrder};
use crate::training::split::ChosenSplit;
use crate::utils::Parallelism;

/// The next level produced by [`split_level`].
#[derive(Debug, Clone)]
pub struct LevelSplit {
    /// Record of the level that was split.
    pub record: LevelRecord,
    pub children: NodeList,
    pub child_stats: ImpurityStore,
}

/// Whether the children of a level can no longer split.
#[inline]
pub fn children_are_terminal(config: &ForestConfig, level: u32) -> bool {
    config.max_depth > 0 && level + 1 >= config.max_depth
}

/// Apply `choices` (one per node) to the level held in `nodes`.
#[allow(clippy::too_many_arguments)]
pub fn split_level(
    level: u32,
    nodes: &mut NodeList,
    stats: &ImpurityStore,
    choices: &[Option<ChosenSplit>],
    order: &mut RowOrder,
    table: &BinnedTable,
    config: &ForestConfig,
    parallelism: Parallelism,
) -> LevelSplit {
    debug_assert_eq!(choices.len(), nodes.len());
    let split_ids: Vec<usize> = (0..nodes.len()).filter(|&i| choices[i].is_some()).collect();

    let tasks: Vec<PartitionTask> = split_ids
        .iter()
        .filter_map(|&i| {
            choices[i].as_ref().map(|chosen| PartitionTask {
                range: nodes.row_range(i),
                feature: chosen.candidate.feature,
                bin: chosen.candidate.bin,
            })
        })
        .collect();

    let left_local = if children_are_terminal(config, level) {
        parallelism.maybe_par_map(tasks.as_slice(), |task| {
            order.count_left(table, task.range.clone(), task.feature, task.bin)
        })
    } else {
        order.partition(table, &tasks, config.partition_mode, parallelism)
    };

    for (&i, &left_local_row_count) in split_ids.iter().zip(&left_local) {
        if let Some(chosen) = &choices[i] {
            let c = &chosen.candidate;
            nodes.set_split(
                i,
                &SplitChoice {
                    feature: c.feature,
                    bin: c.bin,
                    left_local_row_count,
                    left_global_row_count: c.left_count,
                    impurity_decrease: c.impurity_decrease,
                },
            );
        }
    }

    let record = level_record(nodes, stats);

    let mut children = NodeList::with_capacity(2 * split_ids.len());
    let mut child_stats = stats.empty_like();
    for &i in &split_ids {
        let Some(chosen) = &choices[i] else { continue };
        let node = nodes.node(i);
        push_child_stats(&mut child_stats, stats, i, &chosen.left_stats);

        let right_local = node.local_row_count - node.left_local_row_count;
        let right_global = node.global_row_count - node.left_global_row_count;
        let left_pos = node.tree_position.wrapping_mul(2);
        let left = children.len();
        children.push(
            node.tree,
            left_pos,
            node.row_offset,
            node.left_local_row_count,
            node.left_global_row_count,
            child_stats.winning_class(left),
        );
        children.push(
            node.tree,
            left_pos.wrapping_add(1),
            node.row_offset + node.left_local_row_count,
            right_local,
            right_global,
            child_stats.winning_class(left + 1),
        );
    }

    LevelSplit {
        record,
        children,
        child_stats,
    }
}

/// Push the left and right statistics of split node `node`.
fn push_child_stats(out: &mut ImpurityStore, parent: &ImpurityStore, node: usize, left_stats: &[f64]) {
    match parent {
        ImpurityStore::Classification { .. } => {
            let total = parent.class_counts(node);
            let left: Vec<u64> = left_stats.iter().map(|&c| c as u64).collect();
            let right: Vec<u64> = total.iter().zip(&left).map(|(&t, &l)| t.saturating_sub(l)).collect();
            out.push_classes(&left);
            out.push_classes(&right);
        }
        ImpurityStore::Regression { .. } => {
            let whole = parent.moments(node);
            let left = Moments::from_shifted_sums(left_stats[0], left_stats[1], left_stats[2], whole.mean);
            out.push_moments(left);
            out.push_moments(whole.subtract(&left));
        }
    }
}

/// Records of every node of a level, leaves included.
pub fn level_record(nodes: &NodeList, stats: &ImpurityStore) -> LevelRecord {
    let records = (0..nodes.len())
        .map(|i| {
            let node = nodes.node(i);
            let response = match node.winning_class {
                LEAF_MARK => stats.response(i),
                class => f64::from(class),
            };
            NodeRecord {
                tree: node.tree,
                split_feature: node.split_feature,
                split_bin: node.split_bin,
                response,
                class_counts: stats.class_counts(i).to_vec(),
                impurity: stats.impurity(i),
                row_count: stats.row_count(i),
                impurity_decrease: node.impurity_decrease,
            }
        })
        .collect();
    LevelRecord { nodes: records }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::config::Task;
    use crate::training::split::SplitCandidate;

    fn table() -> BinnedTable {
        // feature 0 codes of rows 0..6
        let codes = vec![2, 0, 1, 3, 0, 2];
        BinnedTable::from_row_major(codes, 6, 1, vec![4], vec![vec![0.5, 1.5, 2.5, 3.5]]).unwrap()
    }

    fn chosen(bin: u32, left_count: u64, left_stats: Vec<f64>) -> ChosenSplit {
        ChosenSplit {
            candidate: SplitCandidate {
                feature: 0,
                bin,
                left_count,
                right_count: 6 - left_count,
                left_impurity: 0.0,
                right_impurity: 0.0,
                impurity_decrease: 0.5,
            },
            left_stats,
        }
    }

    fn classification_level() -> (NodeList, ImpurityStore) {
        let mut nodes = NodeList::default();
        nodes.push(0, 0, 0, 6, 6, 0);
        let mut stats = ImpurityStore::new(2);
        stats.push_classes(&[3, 3]);
        (nodes, stats)
    }

    #[test]
    fn test_split_partitions_and_packs_children() {
        let table = table();
        let config = ForestConfig::builder()
            .task(Task::Classification { n_classes: 2 })
            .build()
            .unwrap();
        let (mut nodes, stats) = classification_level();
        let mut order = RowOrder::new((0..6).collect());
        // rows with bin <= 1 are rows 1, 2, 4: all class 0
        let choices = [Some(chosen(1, 3, vec![3.0, 0.0]))];

        let out = split_level(0, &mut nodes, &stats, &choices, &mut order, &table, &config, Parallelism::Sequential);

        assert_eq!(order.as_slice(), &[1, 2, 4, 0, 3, 5]);
        assert_eq!(out.children.len(), 2);
        assert_eq!(out.children.row_range(0), 0..3);
        assert_eq!(out.children.row_range(1), 3..6);
        assert_eq!((out.children.tree_position(0), out.children.tree_position(1)), (0, 1));
        assert_eq!(out.child_stats.class_counts(0), &[3, 0]);
        assert_eq!(out.child_stats.class_counts(1), &[0, 3]);
        assert_eq!(out.children.node(1).winning_class, 1);

        let root = &out.record.nodes[0];
        assert_eq!((root.split_feature, root.split_bin), (0, 1));
        assert_eq!(root.row_count, 6);
        assert_eq!(root.class_counts, vec![3, 3]);
    }

    #[test]
    fn test_terminal_children_are_counted_not_partitioned() {
        let table = table();
        let config = ForestConfig::builder()
            .task(Task::Classification { n_classes: 2 })
            .max_depth(1)
            .build()
            .unwrap();
        let (mut nodes, stats) = classification_level();
        let mut order = RowOrder::new((0..6).collect());
        let choices = [Some(chosen(1, 3, vec![3.0, 0.0]))];

        let out = split_level(0, &mut nodes, &stats, &choices, &mut order, &table, &config, Parallelism::Sequential);
        assert_eq!(order.as_slice(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(nodes.node(0).left_local_row_count, 3);
        assert_eq!(out.children.node(0).local_row_count, 3);
    }

    #[test]
    fn test_leaf_level_has_no_children() {
        let table = table();
        let config = ForestConfig::builder().task(Task::Regression).build().unwrap();
        let mut nodes = NodeList::default();
        nodes.push(0, 0, 0, 6, 6, LEAF_MARK);
        let mut stats = ImpurityStore::new(0);
        stats.push_moments(Moments::from_values([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        let mut order = RowOrder::new((0..6).collect());

        let out = split_level(0, &mut nodes, &stats, &[None], &mut order, &table, &config, Parallelism::Parallel);
        assert!(out.children.is_empty());
        assert!(out.record.nodes[0].is_leaf());
        assert_eq!(out.record.nodes[0].response, 3.5);
    }

    #[test]
    fn test_regression_children_by_subtraction() {
        let table = table();
        let config = ForestConfig::builder().task(Task::Regression).build().unwrap();
        let values = [10.0, 1.0, 2.0, 20.0, 3.0, 12.0];
        let whole = Moments::from_values(values);
        let mut nodes = NodeList::default();
        nodes.push(0, 0, 0, 6, 6, LEAF_MARK);
        let mut stats = ImpurityStore::new(0);
        stats.push_moments(whole);
        let mut order = RowOrder::new((0..6).collect());

        // left rows 1, 2, 4 with values 1, 2, 3
        let d: Vec<f64> = [1.0, 2.0, 3.0].iter().map(|v| v - whole.mean).collect();
        let left_stats = vec![3.0, d.iter().sum(), d.iter().map(|x| x * x).sum()];
        let out = split_level(
            0,
            &mut nodes,
            &stats,
            &[Some(chosen(1, 3, left_stats))],
            &mut order,
            &table,
            &config,
            Parallelism::Sequential,
        );

        let left = out.child_stats.moments(0);
        let right = out.child_stats.moments(1);
        assert_eq!((left.count, right.count), (3, 3));
        assert!((left.mean - 2.0).abs() < 1e-12);
        assert!((right.mean - 14.0).abs() < 1e-12);
        assert!((left.m2 - 2.0).abs() < 1e-9);
        assert!((right.m2 - 56.0).abs() < 1e-9);
    }
}
