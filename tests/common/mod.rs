//! Shared helpers for integration tests.
//!
//! For assertion helpers and synthetic data, use `binforest::testing`.

#![allow(dead_code)]

use binforest::testing::unit_borders;
use binforest::{
    BinnedTable, Forest, ForestConfig, ForestTrainer, ThreadGroup, TrainingResult, WorkerRows,
};

#[allow(unused_imports)]
pub use binforest::assert_approx_eq;
#[allow(unused_imports)]
pub use binforest::testing::{assert_slice_approx_eq, DEFAULT_TOLERANCE};

/// Table with one column per entry of `columns`, borders `b + 0.5`.
pub fn table_from_columns(columns: &[Vec<u32>], n_bins: u32) -> BinnedTable {
    let n_features = columns.len();
    let n_rows = columns.first().map_or(0, Vec::len);
    let codes: Vec<u32> = (0..n_rows)
        .flat_map(|r| columns.iter().map(move |c| c[r]))
        .collect();
    BinnedTable::from_row_major(
        codes,
        n_rows,
        n_features,
        vec![n_bins; n_features],
        (0..n_features).map(|_| unit_borders(n_bins)).collect(),
    )
    .expect("test table is well formed")
}

/// Train a fresh forest with one worker.
pub fn train(config: &ForestConfig, table: &BinnedTable, labels: &[f64]) -> (Forest, TrainingResult) {
    let mut forest = Forest::new(config.task, table.n_features());
    let result = ForestTrainer::new(config.clone())
        .train(table, labels, &mut forest)
        .expect("training succeeds");
    (forest, result)
}

/// Train with `n_workers` in-process workers, each owning an even slice of
/// the rows. Returns every worker's forest and result, in rank order.
pub fn train_distributed(
    config: &ForestConfig,
    table: &BinnedTable,
    labels: &[f64],
    n_workers: usize,
) -> Vec<(Forest, TrainingResult)> {
    let comms = ThreadGroup::new(n_workers);
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .iter()
            .enumerate()
            .map(|(rank, comm)| {
                let worker = WorkerRows::even_split(table.n_rows(), n_workers, rank);
                let local_table = table.slice_rows(worker.begin, worker.end());
                let local_labels = &labels[worker.begin..worker.end()];
                s.spawn(move || {
                    let mut forest = Forest::new(config.task, local_table.n_features());
                    let result = ForestTrainer::new(config.clone())
                        .train_distributed(&local_table, local_labels, worker, comm, &mut forest)
                        .expect("distributed training succeeds");
                    (forest, result)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker thread panicked"))
            .collect()
    })
}
