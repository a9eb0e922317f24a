//! End-to-end trees on hand-checkable datasets.

use binforest::model::{NodeId, Tree};
use binforest::testing::{random_binned_table, synthetic_classification, synthetic_regression};
use binforest::{ForestConfig, Precision, SplitMethod, Task, TrainError};
use rstest::rstest;

use crate::common::{assert_approx_eq, table_from_columns, train, DEFAULT_TOLERANCE};

fn single_tree(task: Task) -> ForestConfig {
    ForestConfig::builder()
        .task(task)
        .n_trees(1)
        .bootstrap(false)
        .n_threads(1)
        .build()
        .unwrap()
}

#[test]
fn binary_feature_gives_pure_children() {
    let table = table_from_columns(&[vec![0, 0, 0, 1, 1, 1, 1, 1]], 2);
    let labels = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
    let (forest, _) = train(&single_tree(Task::Classification { n_classes: 2 }), &table, &labels);

    let tree = forest.tree(0);
    assert_eq!(tree.split_feature(0), 0);
    assert_eq!(tree.split_bin(0), 0);
    assert_approx_eq!(tree.impurity(0), 1.0 - (3.0f64 / 8.0).powi(2) - (5.0f64 / 8.0).powi(2), DEFAULT_TOLERANCE);
    assert_approx_eq!(tree.impurity(0), 0.46875, DEFAULT_TOLERANCE);

    let (left, right) = (tree.left_child(0), tree.right_child(0));
    assert!(tree.is_leaf(left) && tree.is_leaf(right));
    assert_eq!(tree.impurity(left), 0.0);
    assert_eq!(tree.impurity(right), 0.0);
    assert_eq!(tree.row_count(left), 3);
    assert_eq!(tree.row_count(right), 5);
    assert_eq!(forest.predict_binned_row(&[0]), 0.0);
    assert_eq!(forest.predict_binned_row(&[1]), 1.0);
}

#[test]
fn regression_splits_in_the_middle() {
    let table = table_from_columns(&[vec![0, 1, 2, 3]], 4);
    let config = ForestConfig::builder()
        .task(Task::Regression)
        .n_trees(1)
        .bootstrap(false)
        .max_depth(1)
        .min_observations_in_leaf(1)
        .n_threads(1)
        .build()
        .unwrap();
    let (forest, _) = train(&config, &table, &[1.0, 2.0, 3.0, 4.0]);

    let tree = forest.tree(0);
    assert_eq!(tree.split_bin(0), 1);
    assert_approx_eq!(tree.response(tree.left_child(0)), 1.5, DEFAULT_TOLERANCE);
    assert_approx_eq!(tree.response(tree.right_child(0)), 3.5, DEFAULT_TOLERANCE);
    // variance 1.25 down to 0.25 on both sides
    assert_approx_eq!(tree.impurity_decrease(0), 1.0, DEFAULT_TOLERANCE);
}

/// Split nodes of a tree, found by walking down from the root.
fn split_nodes(tree: &Tree) -> Vec<NodeId> {
    let mut stack: Vec<NodeId> = vec![0];
    let mut out = Vec::new();
    while let Some(node) = stack.pop() {
        if !tree.is_leaf(node) {
            out.push(node);
            stack.push(tree.left_child(node));
            stack.push(tree.right_child(node));
        }
    }
    out
}

#[rstest]
#[case(Task::Classification { n_classes: 3 }, true)]
#[case(Task::Classification { n_classes: 3 }, false)]
#[case(Task::Regression, true)]
#[case(Task::Regression, false)]
fn children_partition_their_parent_rows(#[case] task: Task, #[case] bootstrap: bool) {
    let (table, labels) = match task {
        Task::Classification { n_classes } => synthetic_classification(500, 5, 16, n_classes, 13),
        Task::Regression => synthetic_regression(500, 5, 16, 13),
    };
    let config = ForestConfig::builder()
        .task(task)
        .n_trees(5)
        .bootstrap(bootstrap)
        .build()
        .unwrap();
    let (forest, _) = train(&config, &table, &labels);

    for tree in forest.trees() {
        if !bootstrap {
            assert_eq!(tree.row_count(0), 500);
        }
        let splits = split_nodes(tree);
        assert!(!splits.is_empty());
        for node in splits {
            let (left, right) = (tree.left_child(node), tree.right_child(node));
            assert!(tree.row_count(left) > 0 && tree.row_count(right) > 0);
            assert_eq!(tree.row_count(left) + tree.row_count(right), tree.row_count(node));
        }
    }
}

#[test]
fn impurity_threshold_above_root_impurity_keeps_roots() {
    let (table, labels) = synthetic_classification(200, 4, 8, 2, 3);
    let base = ForestConfig::builder()
        .task(Task::Classification { n_classes: 2 })
        .n_trees(2)
        .build()
        .unwrap();
    // two-class Gini never exceeds 0.5
    let strict = ForestConfig {
        impurity_threshold: 0.99,
        ..base.clone()
    };
    let (forest, _) = train(&strict, &table, &labels);
    assert!(forest.trees().iter().all(|t| t.n_nodes() == 1));

    let loose = ForestConfig {
        impurity_threshold: 0.01,
        ..base
    };
    let (forest, _) = train(&loose, &table, &labels);
    assert!(forest.trees().iter().all(|t| t.n_nodes() > 1));
}

#[rstest]
#[case(0.5, 3)]
#[case(1.0, 3)]
#[case(1.5, 1)]
fn min_impurity_decrease_filters_the_best_split(#[case] min_decrease: f64, #[case] n_nodes: usize) {
    // best split decreases variance by exactly 1.0
    let table = table_from_columns(&[vec![0, 1, 2, 3]], 4);
    let config = ForestConfig::builder()
        .task(Task::Regression)
        .n_trees(1)
        .bootstrap(false)
        .max_depth(1)
        .min_impurity_decrease(min_decrease)
        .n_threads(1)
        .build()
        .unwrap();
    let (forest, _) = train(&config, &table, &[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(forest.tree(0).n_nodes(), n_nodes);
}

#[rstest]
#[case(8, 3)]
#[case(9, 1)]
fn min_observations_in_split_gates_the_root(#[case] min_split: u64, #[case] n_nodes: usize) {
    let table = table_from_columns(&[vec![0, 0, 0, 1, 1, 1, 1, 1]], 2);
    let labels = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
    let config = ForestConfig {
        min_observations_in_split: min_split,
        ..single_tree(Task::Classification { n_classes: 2 })
    };
    let (forest, _) = train(&config, &table, &labels);
    assert_eq!(forest.tree(0).n_nodes(), n_nodes);
}

#[test]
fn single_precision_training() {
    let table = table_from_columns(&[vec![0, 1, 2, 3]], 4);
    let config = ForestConfig::builder()
        .task(Task::Regression)
        .n_trees(1)
        .bootstrap(false)
        .max_depth(1)
        .precision(Precision::Single)
        .n_threads(1)
        .build()
        .unwrap();
    let (forest, _) = train(&config, &table, &[1.0, 2.0, 3.0, 4.0]);
    let tree = forest.tree(0);
    assert_eq!(tree.split_bin(0), 1);
    assert_approx_eq!(tree.impurity_decrease(0), 1.0, 1e-6);

    // every recorded decrease is representable in single precision
    let (table, labels) = synthetic_regression(400, 4, 32, 8);
    let config = ForestConfig::builder()
        .task(Task::Regression)
        .n_trees(3)
        .max_depth(5)
        .precision(Precision::Single)
        .build()
        .unwrap();
    let (forest, _) = train(&config, &table, &labels);
    for tree in forest.trees() {
        for node in split_nodes(tree) {
            let decrease = tree.impurity_decrease(node);
            assert_eq!(decrease as f32 as f64, decrease);
            assert!(decrease >= 0.0);
        }
    }
}

#[test]
fn min_leaf_above_half_keeps_root_a_leaf() {
    let table = table_from_columns(&[vec![0, 0, 1, 1, 2, 2]], 3);
    let labels = [0.0, 0.0, 1.0, 1.0, 0.0, 1.0];
    let config = ForestConfig::builder()
        .task(Task::Classification { n_classes: 2 })
        .n_trees(1)
        .bootstrap(false)
        .min_observations_in_leaf(4)
        .n_threads(1)
        .build()
        .unwrap();
    let (forest, _) = train(&config, &table, &labels);

    let tree = forest.tree(0);
    assert_eq!(tree.n_nodes(), 1);
    assert!(tree.is_leaf(0));
    assert!(tree.impurity(0) > 0.0);
}

#[test]
fn min_leaf_rejects_unbalanced_candidates() {
    // the pure split at bin 1 leaves 2 rows on the left; only the middle
    // split keeps 3 rows on each side
    let table = table_from_columns(&[vec![0, 1, 2, 3, 4, 5]], 6);
    let labels = [0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
    let config = ForestConfig::builder()
        .task(Task::Classification { n_classes: 2 })
        .n_trees(1)
        .bootstrap(false)
        .min_observations_in_leaf(3)
        .n_threads(1)
        .build()
        .unwrap();
    let (forest, _) = train(&config, &table, &labels);
    let tree = forest.tree(0);
    assert_eq!(tree.split_bin(0), 2);
    assert!(tree.is_leaf(tree.left_child(0)));
    assert!(tree.is_leaf(tree.right_child(0)));
    assert_eq!(tree.response(tree.right_child(0)), 1.0);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(4)]
#[case(5)]
fn random_split_stays_in_observed_bins(#[case] seed: u64) {
    // codes only in 3..=6 out of 16 bins
    let codes: Vec<u32> = (0..40).map(|r| 3 + (r % 4)).collect();
    let labels: Vec<f64> = codes.iter().map(|&c| f64::from(u8::from(c >= 5))).collect();
    let table = table_from_columns(&[codes], 16);
    let config = ForestConfig::builder()
        .task(Task::Classification { n_classes: 2 })
        .n_trees(1)
        .bootstrap(false)
        .max_depth(1)
        .split_method(SplitMethod::Random)
        .seed(seed)
        .n_threads(1)
        .build()
        .unwrap();
    let (forest, _) = train(&config, &table, &labels);

    let bin = forest.tree(0).split_bin(0);
    assert!((3..6).contains(&bin), "split bin {bin} outside the observed range");
}

#[test]
fn constant_response_grows_only_roots() {
    let table = random_binned_table(50, 3, 8, 11);
    let config = ForestConfig::builder()
        .task(Task::Regression)
        .n_trees(3)
        .n_threads(1)
        .build()
        .unwrap();
    let (forest, result) = train(&config, &table, &[2.5; 50]);
    assert!(forest.trees().iter().all(|t| t.n_nodes() == 1));
    assert!(forest.trees().iter().all(|t| t.response(0) == 2.5));
    assert_eq!(result.n_trees, 3);
}

#[test]
fn non_finite_target_is_rejected() {
    let table = random_binned_table(4, 1, 4, 0);
    let config = single_tree(Task::Regression);
    let mut forest = binforest::Forest::new(config.task, 1);
    let err = binforest::ForestTrainer::new(config)
        .train(&table, &[0.0, f64::NAN, 1.0, 2.0], &mut forest)
        .unwrap_err();
    assert!(matches!(err, TrainError::NonFiniteTarget { row: 1 }));
}
