//! Distributed training against the single-worker reference.

use binforest::testing::{synthetic_classification, synthetic_regression};
use binforest::{ForestConfig, ReductionPoint, ResultsToCompute, SplitMethod, Task, VariableImportance};
use rstest::rstest;

use crate::common::{assert_approx_eq, table_from_columns, train, train_distributed};

#[test]
fn two_workers_match_single_worker_root() {
    // scenario of the first end-to-end test, rows split 4 / 4
    let table = table_from_columns(&[vec![0, 0, 0, 1, 1, 1, 1, 1]], 2);
    let labels = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
    let config = ForestConfig::builder()
        .task(Task::Classification { n_classes: 2 })
        .n_trees(1)
        .bootstrap(false)
        .n_threads(1)
        .build()
        .unwrap();

    let (single, _) = train(&config, &table, &labels);
    for (forest, _) in train_distributed(&config, &table, &labels, 2) {
        let (a, b) = (single.tree(0), forest.tree(0));
        assert_eq!(a.impurity(0), b.impurity(0));
        assert_eq!((a.split_feature(0), a.split_bin(0)), (b.split_feature(0), b.split_bin(0)));
        assert_eq!(a.row_count(0), b.row_count(0));
        assert_eq!(&single, &forest);
    }
}

#[rstest]
#[case(2)]
#[case(3)]
fn classification_forest_is_worker_independent(#[case] n_workers: usize) {
    let (table, labels) = synthetic_classification(600, 5, 16, 3, 21);
    let config = ForestConfig::builder()
        .task(Task::Classification { n_classes: 3 })
        .n_trees(8)
        .max_depth(6)
        .n_threads(1)
        .results(ResultsToCompute {
            oob_error: true,
            oob_error_per_row: false,
            variable_importance: VariableImportance::Mdi,
        })
        .build()
        .unwrap();

    let (single, single_result) = train(&config, &table, &labels);
    let workers = train_distributed(&config, &table, &labels, n_workers);
    assert_eq!(workers.len(), n_workers);

    for (forest, result) in &workers {
        assert_eq!(forest, &single);
        // misclassification counts are integral, so the sums are exact
        assert_eq!(result.oob_error, single_result.oob_error);
        assert_eq!(result.variable_importance, single_result.variable_importance);
        assert_eq!(result.reductions.len(), single_result.reductions.len());
    }
}

#[test]
fn random_splits_are_worker_independent() {
    let (table, labels) = synthetic_classification(600, 4, 32, 2, 13);
    let config = ForestConfig::builder()
        .task(Task::Classification { n_classes: 2 })
        .n_trees(4)
        .max_depth(5)
        .split_method(SplitMethod::Random)
        .n_threads(1)
        .build()
        .unwrap();

    let (single, single_result) = train(&config, &table, &labels);
    let count = |reductions: &[(ReductionPoint, usize)], point| reductions.iter().filter(|(p, _)| *p == point).count();
    let first_len = |reductions: &[(ReductionPoint, usize)], point| reductions.iter().find(|(p, _)| *p == point).map(|r| r.1);
    assert_eq!(count(&single_result.reductions, ReductionPoint::SplitHistograms), 0);
    assert!(count(&single_result.reductions, ReductionPoint::SplitRanges) > 0);

    for (forest, result) in train_distributed(&config, &table, &labels, 3) {
        assert_eq!(forest, single);
        assert_eq!(
            count(&result.reductions, ReductionPoint::SplitRanges),
            count(&result.reductions, ReductionPoint::SplitThresholds)
        );
        // one slot pair per rank
        assert_eq!(
            first_len(&result.reductions, ReductionPoint::SplitRanges),
            first_len(&single_result.reductions, ReductionPoint::SplitRanges).map(|len| 3 * len)
        );
    }
}

#[test]
fn regression_root_matches_within_tolerance() {
    let (table, labels) = synthetic_regression(500, 3, 16, 4);
    let config = ForestConfig::builder()
        .task(Task::Regression)
        .n_trees(3)
        .max_depth(1)
        .n_threads(1)
        .build()
        .unwrap();

    let (single, _) = train(&config, &table, &labels);
    for (forest, _) in train_distributed(&config, &table, &labels, 2) {
        for (a, b) in single.trees().iter().zip(forest.trees()) {
            assert_approx_eq!(a.impurity(0), b.impurity(0), 1e-9);
            assert_approx_eq!(a.response(0), b.response(0), 1e-9);
            assert_eq!(a.row_count(0), b.row_count(0));
            assert_eq!(a.split_feature(0), b.split_feature(0));
            assert_eq!(a.split_bin(0), b.split_bin(0));
        }
    }
}

#[test]
fn per_tree_collectives_are_auditable() {
    let (table, labels) = synthetic_classification(200, 3, 8, 2, 6);
    let config = ForestConfig::builder()
        .task(Task::Classification { n_classes: 2 })
        .n_trees(3)
        .max_depth(3)
        .n_threads(1)
        .results(ResultsToCompute {
            oob_error: true,
            oob_error_per_row: true,
            variable_importance: VariableImportance::MdaRaw,
        })
        .build()
        .unwrap();

    let workers = train_distributed(&config, &table, &labels, 2);
    let reductions = &workers[0].1.reductions;
    let count = |point: ReductionPoint| reductions.iter().filter(|(p, _)| *p == point).count();

    assert_eq!(reductions.first().map(|r| r.0), Some(ReductionPoint::BlockPlan));
    assert_eq!(count(ReductionPoint::RootMoments), 1);
    assert_eq!(count(ReductionPoint::TreeOobErrors), 3);
    assert_eq!(count(ReductionPoint::OobTotals), 1);
    assert_eq!(reductions.last().map(|r| r.0), Some(ReductionPoint::OobTotals));
    // one histogram collective per level that searched at least one node
    assert!(count(ReductionPoint::SplitHistograms) <= 3);
    assert_eq!(workers[1].1.reductions, *reductions);

    // per-row errors cover each worker's own rows
    assert_eq!(workers[0].1.oob_error_per_row.as_ref().map(Vec::len), Some(100));
    assert_eq!(workers[1].1.oob_error_per_row.as_ref().map(Vec::len), Some(100));
}
