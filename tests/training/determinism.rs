//! Reproducibility: seeds, thread counts, block sizes and strategies.

use binforest::testing::{synthetic_classification, synthetic_regression};
use binforest::{
    ForestConfig, ForestTrainer, PartitionMode, ResultsToCompute, SplitMethod, SplitStrategy, Task, TrainError,
    VariableImportance,
};
use rstest::rstest;

use crate::common::train;

fn with_outputs(task: Task) -> ForestConfig {
    ForestConfig::builder()
        .task(task)
        .n_trees(12)
        .max_depth(6)
        .seed(42)
        .results(ResultsToCompute {
            oob_error: true,
            oob_error_per_row: true,
            variable_importance: VariableImportance::MdaScaled,
        })
        .build()
        .unwrap()
}

#[test]
fn same_seed_same_forest() {
    let (table, labels) = synthetic_classification(400, 5, 16, 3, 1);
    let config = with_outputs(Task::Classification { n_classes: 3 });
    let (a, ra) = train(&config, &table, &labels);
    let (b, rb) = train(&config, &table, &labels);
    assert_eq!(a, b);
    assert_eq!(ra, rb);

    let other = ForestConfig { seed: 43, ..config };
    let (c, _) = train(&other, &table, &labels);
    assert_ne!(a, c);
}

#[rstest]
#[case(Task::Classification { n_classes: 3 })]
#[case(Task::Regression)]
fn thread_count_does_not_change_results(#[case] task: Task) {
    let (table, labels) = match task {
        Task::Classification { n_classes } => synthetic_classification(2_000, 6, 32, n_classes, 2),
        Task::Regression => synthetic_regression(2_000, 6, 32, 2),
    };
    let sequential = ForestConfig {
        n_threads: 1,
        ..with_outputs(task)
    };
    let parallel = ForestConfig {
        n_threads: 4,
        ..with_outputs(task)
    };
    let (a, ra) = train(&sequential, &table, &labels);
    let (b, rb) = train(&parallel, &table, &labels);
    assert_eq!(a, b);
    assert_eq!(ra, rb);
}

#[test]
fn block_size_does_not_change_results() {
    let (table, labels) = synthetic_regression(300, 4, 16, 3);
    let config = with_outputs(Task::Regression);
    let (reference, reference_result) = train(&config, &table, &labels);
    assert_eq!(reference_result.trees_per_block, 12);

    // shrink the budget until blocks get smaller, then until nothing fits
    let mut block_sizes = Vec::new();
    let mut budget = 1u64 << 22;
    loop {
        let limited = ForestConfig {
            memory_budget_bytes: budget,
            ..config.clone()
        };
        let mut forest = binforest::Forest::new(limited.task, table.n_features());
        match ForestTrainer::new(limited).train(&table, &labels, &mut forest) {
            Ok(result) => {
                assert_eq!(forest, reference, "budget {budget}");
                assert_eq!(result.oob_error, reference_result.oob_error);
                assert_eq!(result.variable_importance, reference_result.variable_importance);
                block_sizes.push(result.trees_per_block);
            }
            Err(TrainError::ResourceExhausted { .. }) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
        budget /= 2;
    }

    assert!(block_sizes.iter().any(|&b| b < 12));
    assert!(block_sizes.windows(2).all(|w| w[0] >= w[1]));
}

#[rstest]
#[case(SplitStrategy::FeatureTask)]
#[case(SplitStrategy::BinBlocked)]
#[case(SplitStrategy::SinglePass)]
fn strategies_grow_identical_forests(#[case] strategy: SplitStrategy) {
    for task in [Task::Classification { n_classes: 2 }, Task::Regression] {
        let (table, labels) = match task {
            Task::Classification { n_classes } => synthetic_classification(3_000, 4, 300, n_classes, 5),
            Task::Regression => synthetic_regression(3_000, 4, 300, 5),
        };
        let auto = ForestConfig::builder()
            .task(task)
            .n_trees(4)
            .max_depth(5)
            .fast_memory_rows(512)
            .bin_block_threshold(256)
            .build()
            .unwrap();
        let forced = ForestConfig {
            split_strategy: strategy,
            ..auto.clone()
        };
        let (a, _) = train(&auto, &table, &labels);
        let (b, _) = train(&forced, &table, &labels);
        assert_eq!(a, b, "{strategy:?} on {task:?}");
    }
}

#[test]
fn random_splits_are_reproducible() {
    let (table, labels) = synthetic_classification(500, 4, 32, 2, 8);
    let config = ForestConfig::builder()
        .task(Task::Classification { n_classes: 2 })
        .n_trees(6)
        .split_method(SplitMethod::Random)
        .build()
        .unwrap();
    let sequential = ForestConfig {
        n_threads: 1,
        ..config.clone()
    };
    let (a, _) = train(&config, &table, &labels);
    let (b, _) = train(&sequential, &table, &labels);
    assert_eq!(a, b);
}

#[test]
fn atomic_cursor_partition_matches_prefix_scan() {
    // class counts are exact, so the row order inside a node cannot
    // change the chosen splits
    let (table, labels) = synthetic_classification(40_000, 3, 16, 2, 9);
    let base = ForestConfig::builder()
        .task(Task::Classification { n_classes: 2 })
        .n_trees(2)
        .max_depth(4)
        .n_threads(4)
        .build()
        .unwrap();
    let atomic = ForestConfig {
        partition_mode: PartitionMode::AtomicCursor,
        ..base.clone()
    };
    let (a, _) = train(&base, &table, &labels);
    let (b, _) = train(&atomic, &table, &labels);
    assert_eq!(a, b);
}
