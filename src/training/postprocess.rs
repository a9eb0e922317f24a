//! Out-of-bag error and variable importance.
//!
//! After a block of trees has been handed to the model manager, every tree
//! predicts its local out-of-bag rows:
//!
//! - classification rows collect votes, regression rows keep a running mean
//!   of the tree responses;
//! - for permutation importance the tree's baseline OOB error is compared to
//!   the error after shuffling one feature's bins among the OOB rows. The
//!   per-tree error sums are allreduced, and the normalized deltas feed a
//!   Welford accumulator per feature.
//!
//! Impurity importance sums the decreases of every split in the level
//! records, which are global already.
//!
//! At the end the OOB error sums are allreduced and turned into the OOB
//! error (misclassification rate or MSE), accuracy or R², and the optional
//! per-row vector, where rows never out of bag hold `-1.0`.

use crate::comm::{ReductionPoint, Reducer};
use crate::data::{BinnedTable, Response};
use crate::error::Result;
use crate::model::{LevelRecord, ModelManager};
use crate::random::{RandomEngine, StreamKey};
use crate::training::config::{ResultsToCompute, Task, VariableImportance};
use crate::training::impurity::Moments;
use crate::utils::{argmax_first, Parallelism};

/// Marks a row that was never out of bag.
pub const UNVISITED_ROW: f64 = -1.0;

/// Per-row out-of-bag predictions.
#[derive(Debug, Clone, PartialEq)]
enum OobPredictions {
    /// `n_rows * n_classes` votes.
    Votes { n_classes: usize, votes: Vec<u32> },
    /// Running mean of tree responses and number of trees.
    Means { mean: Vec<f64>, count: Vec<u32> },
}

/// Final out-of-bag statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OobSummary {
    pub oob_error: Option<f64>,
    pub oob_accuracy: Option<f64>,
    pub oob_r2: Option<f64>,
    pub oob_error_per_row: Option<Vec<f64>>,
    pub variable_importance: Option<Vec<f64>>,
}

/// Accumulates OOB predictions and importance over all tree blocks.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    task: Task,
    results: ResultsToCompute,
    n_features: usize,
    oob: Option<OobPredictions>,
    /// Welford statistics of permutation deltas per feature.
    mda: Vec<Moments>,
    /// Sum of split decreases per feature.
    mdi: Vec<f64>,
    n_trees: usize,
}

impl PostProcessor {
    pub fn new(task: Task, results: ResultsToCompute, n_local_rows: usize, n_features: usize) -> Self {
        let oob = (results.oob_error || results.oob_error_per_row).then(|| match task {
            Task::Classification { n_classes } => OobPredictions::Votes {
                n_classes: n_classes as usize,
                votes: vec![0; n_local_rows * n_classes as usize],
            },
            Task::Regression => OobPredictions::Means {
                mean: vec![0.0; n_local_rows],
                count: vec![0; n_local_rows],
            },
        });
        let mda = if results.variable_importance.is_permutation() {
            vec![Moments::default(); n_features]
        } else {
            Vec::new()
        };
        Self {
            task,
            results,
            n_features,
            oob,
            mda,
            mdi: vec![0.0; n_features],
            n_trees: 0,
        }
    }

    /// Whether trees must report their out-of-bag rows.
    #[inline]
    pub fn needs_oob(&self) -> bool {
        self.results.needs_oob()
    }

    /// Add the split decreases of a finished block.
    pub fn record_levels(&mut self, levels: &[LevelRecord], tree_count: usize) {
        for node in levels.iter().flat_map(|l| &l.nodes) {
            if !node.is_leaf() {
                if let Some(sum) = self.mdi.get_mut(node.split_feature as usize) {
                    *sum += node.impurity_decrease;
                }
            }
        }
        self.n_trees += tree_count;
    }

    /// Evaluate tree `tree_index` of `model` on its local OOB rows.
    #[allow(clippy::too_many_arguments)]
    pub fn process_tree(
        &mut self,
        reducer: &mut Reducer<'_>,
        model: &dyn ModelManager,
        tree_index: usize,
        oob_rows: &[u32],
        table: &BinnedTable,
        response: &Response,
        engine: &RandomEngine,
        parallelism: Parallelism,
    ) -> Result<()> {
        let predictions: Vec<f64> =
            parallelism.maybe_par_map(oob_rows, |&r| model.get_tree_response(tree_index, table.row(r as usize)));

        match &mut self.oob {
            Some(OobPredictions::Votes { n_classes, votes }) => {
                for (&r, &p) in oob_rows.iter().zip(&predictions) {
                    let class = p as usize;
                    if class < *n_classes {
                        votes[r as usize * *n_classes + class] += 1;
                    }
                }
            }
            Some(OobPredictions::Means { mean, count }) => {
                for (&r, &p) in oob_rows.iter().zip(&predictions) {
                    let r = r as usize;
                    count[r] += 1;
                    mean[r] += (p - mean[r]) / count[r] as f64;
                }
            }
            None => {}
        }

        if self.mda.is_empty() {
            return Ok(());
        }

        let task = self.task;
        let baseline: f64 = oob_rows
            .iter()
            .zip(&predictions)
            .map(|(&r, &p)| row_error(task, p, response.value(r as usize)))
            .sum();
        let permuted = parallelism.maybe_par_map(0..self.n_features, |feature| {
            permuted_error(model, tree_index, oob_rows, table, response, engine, feature, task)
        });

        // [rows, baseline, permuted errors per feature]
        let mut errors = Vec::with_capacity(2 + self.n_features);
        errors.push(oob_rows.len() as f64);
        errors.push(baseline);
        errors.extend(permuted);
        reducer.sum_f64(ReductionPoint::TreeOobErrors, &mut errors)?;

        let n = errors[0];
        if n > 0.0 {
            let baseline = errors[1] / n;
            for (acc, &e) in self.mda.iter_mut().zip(&errors[2..]) {
                acc.push(e / n - baseline);
            }
        }
        Ok(())
    }

    /// Allreduce the OOB totals and produce the requested outputs.
    pub fn finish(self, reducer: &mut Reducer<'_>, response: &Response) -> Result<OobSummary> {
        let mut summary = OobSummary::default();

        if let Some(oob) = &self.oob {
            let per_row = row_errors(oob, response);
            let visited: Vec<usize> = (0..per_row.len()).filter(|&r| per_row[r] != UNVISITED_ROW).collect();

            // [error sum, visited rows, sum y, sum y^2] over visited rows
            let mut totals = [0.0; 4];
            for &r in &visited {
                let y = response.value(r);
                totals[0] += per_row[r];
                totals[1] += 1.0;
                totals[2] += y;
                totals[3] += y * y;
            }
            reducer.sum_f64(ReductionPoint::OobTotals, &mut totals)?;

            if self.results.oob_error && totals[1] > 0.0 {
                let error = totals[0] / totals[1];
                summary.oob_error = Some(error);
                match self.task {
                    Task::Classification { .. } => summary.oob_accuracy = Some(1.0 - error),
                    Task::Regression => {
                        let n = totals[1];
                        let total_ss = totals[3] - totals[2] * totals[2] / n;
                        summary.oob_r2 = Some(if total_ss > 0.0 {
                            1.0 - totals[0] / total_ss
                        } else {
                            0.0
                        });
                    }
                }
            }
            if self.results.oob_error_per_row {
                summary.oob_error_per_row = Some(per_row);
            }
        }

        summary.variable_importance = match self.results.variable_importance {
            VariableImportance::None => None,
            VariableImportance::Mdi => {
                let n = self.n_trees.max(1) as f64;
                Some(self.mdi.iter().map(|s| s / n).collect())
            }
            VariableImportance::MdaRaw => Some(self.mda.iter().map(|m| m.mean).collect()),
            VariableImportance::MdaScaled => Some(self.mda.iter().map(scaled_importance).collect()),
        };

        Ok(summary)
    }
}

/// Mean divided by its standard error; 0 without spread.
fn scaled_importance(m: &Moments) -> f64 {
    let variance = m.impurity();
    if m.count == 0 || variance <= 0.0 {
        return 0.0;
    }
    m.mean / (variance / m.count as f64).sqrt()
}

/// Misclassification indicator or squared error.
#[inline]
fn row_error(task: Task, prediction: f64, truth: f64) -> f64 {
    match task {
        Task::Classification { .. } => f64::from(u8::from(prediction != truth)),
        Task::Regression => (prediction - truth) * (prediction - truth),
    }
}

/// OOB error sum of a tree after shuffling `feature` among its OOB rows.
#[allow(clippy::too_many_arguments)]
fn permuted_error(
    model: &dyn ModelManager,
    tree_index: usize,
    oob_rows: &[u32],
    table: &BinnedTable,
    response: &Response,
    engine: &RandomEngine,
    feature: usize,
    task: Task,
) -> f64 {
    let mut bins: Vec<u32> = oob_rows.iter().map(|&r| table.bin(r as usize, feature)).collect();
    engine
        .stream(StreamKey::Permutation {
            tree: tree_index as u64,
            feature: feature as u32,
        })
        .shuffle(&mut bins);

    let mut row = Vec::with_capacity(table.n_features());
    oob_rows
        .iter()
        .zip(&bins)
        .map(|(&r, &bin)| {
            row.clear();
            row.extend_from_slice(table.row(r as usize));
            row[feature] = bin;
            row_error(task, model.get_tree_response(tree_index, &row), response.value(r as usize))
        })
        .sum()
}

/// Per-row OOB error, [`UNVISITED_ROW`] where no tree voted.
fn row_errors(oob: &OobPredictions, response: &Response) -> Vec<f64> {
    match oob {
        OobPredictions::Votes { n_classes, votes } => votes
            .chunks_exact(*n_classes)
            .enumerate()
            .map(|(r, v)| {
                if v.iter().all(|&c| c == 0) {
                    UNVISITED_ROW
                } else {
                    row_error(
                        Task::Classification {
                            n_classes: *n_classes as u32,
                        },
                        argmax_first(v) as f64,
                        response.value(r),
                    )
                }
            })
            .collect(),
        OobPredictions::Means { mean, count } => mean
            .iter()
            .zip(count)
            .enumerate()
            .map(|(r, (&m, &c))| {
                if c == 0 {
                    UNVISITED_ROW
                } else {
                    row_error(Task::Regression, m, response.value(r))
                }
            })
            .collect(),
    }
}
