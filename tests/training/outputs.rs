//! Out-of-bag error, variable importance and persistence of trained forests.

use binforest::model::persist::{forest_from_json, forest_to_json};
use binforest::testing::random_binned_table;
use binforest::training::UNVISITED_ROW;
use binforest::{ForestConfig, Parallelism, ResultsToCompute, Task, VariableImportance};
use rstest::rstest;

use crate::common::{assert_approx_eq, assert_slice_approx_eq, train, DEFAULT_TOLERANCE};

/// Label depends on feature 1 only; features 0 and 2 are noise.
fn informative_feature_1(n_rows: usize) -> (binforest::BinnedTable, Vec<f64>) {
    let table = random_binned_table(n_rows, 3, 8, 17);
    let labels = (0..n_rows).map(|r| f64::from(u8::from(table.bin(r, 1) >= 4))).collect();
    (table, labels)
}

fn config(importance: VariableImportance) -> ForestConfig {
    ForestConfig::builder()
        .task(Task::Classification { n_classes: 2 })
        .n_trees(20)
        .features_per_node(3)
        .results(ResultsToCompute {
            oob_error: true,
            oob_error_per_row: true,
            variable_importance: importance,
        })
        .build()
        .unwrap()
}

#[test]
fn oob_error_of_a_learnable_problem_is_small() {
    let (table, labels) = informative_feature_1(400);
    let (_, result) = train(&config(VariableImportance::None), &table, &labels);

    let error = result.oob_error.unwrap();
    assert!(error < 0.05, "oob error {error}");
    assert_approx_eq!(error + result.oob_accuracy.unwrap(), 1.0, DEFAULT_TOLERANCE);
    assert_eq!(result.oob_r2, None);

    let per_row = result.oob_error_per_row.unwrap();
    let visited: Vec<f64> = per_row.iter().copied().filter(|&e| e != UNVISITED_ROW).collect();
    assert!(visited.iter().all(|&e| e == 0.0 || e == 1.0));
    assert_approx_eq!(visited.iter().sum::<f64>() / visited.len() as f64, error, DEFAULT_TOLERANCE);
}

#[test]
fn single_tree_leaves_drawn_rows_unvisited() {
    let (table, labels) = informative_feature_1(100);
    let one_tree = ForestConfig {
        n_trees: 1,
        ..config(VariableImportance::None)
    };
    let (_, result) = train(&one_tree, &table, &labels);
    let per_row = result.oob_error_per_row.unwrap();
    let unvisited = per_row.iter().filter(|&&e| e == UNVISITED_ROW).count();
    // a bootstrap of 100 rows draws about 63 distinct rows
    assert!(unvisited > 40 && unvisited < 90, "{unvisited} rows drawn");
}

#[rstest]
#[case(VariableImportance::Mdi)]
#[case(VariableImportance::MdaRaw)]
#[case(VariableImportance::MdaScaled)]
fn importance_ranks_the_informative_feature_first(#[case] importance: VariableImportance) {
    let (table, labels) = informative_feature_1(400);
    let (_, result) = train(&config(importance), &table, &labels);
    let vi = result.variable_importance.unwrap();
    assert_eq!(vi.len(), 3);
    assert!(vi[1] > vi[0] && vi[1] > vi[2], "{importance:?}: {vi:?}");
}

#[test]
fn mdi_matches_forest_impurity_importance() {
    let (table, labels) = informative_feature_1(300);
    let (forest, result) = train(&config(VariableImportance::Mdi), &table, &labels);
    assert_slice_approx_eq(
        &result.variable_importance.unwrap(),
        &forest.impurity_importance(),
        DEFAULT_TOLERANCE,
        "mdi",
    );
}

#[test]
fn regression_reports_r2() {
    let table = random_binned_table(300, 2, 16, 5);
    let targets: Vec<f64> = (0..300).map(|r| f64::from(table.bin(r, 0)) * 0.5).collect();
    let config = ForestConfig::builder()
        .task(Task::Regression)
        .n_trees(15)
        .features_per_node(2)
        .results(ResultsToCompute {
            oob_error: true,
            oob_error_per_row: false,
            variable_importance: VariableImportance::None,
        })
        .build()
        .unwrap();
    let (_, result) = train(&config, &table, &targets);
    assert!(result.oob_r2.unwrap() > 0.9);
    assert!(result.oob_error.unwrap() < 0.2);
    assert_eq!(result.oob_accuracy, None);
    assert_eq!(result.oob_error_per_row, None);
}

#[test]
fn trained_forest_survives_json() {
    let (table, labels) = informative_feature_1(200);
    let (forest, _) = train(&config(VariableImportance::None), &table, &labels);

    let json = forest_to_json(&forest).unwrap();
    let restored = forest_from_json(&json).unwrap();
    assert_eq!(restored, forest);
    assert_eq!(
        restored.predict_binned(&table, Parallelism::Sequential),
        forest.predict_binned(&table, Parallelism::Sequential)
    );
}
