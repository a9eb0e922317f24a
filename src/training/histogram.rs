//! Root statistics and per-node bin histograms.
//!
//! # Root statistics
//!
//! Classification roots count classes, either with private per-chunk
//! histograms merged in chunk order or, for many classes, with one shared
//! `AtomicU64` histogram per tree. Regression roots take two reductions: first
//! `(count, sum)` to get the global mean, then the sum of squared deviations
//! around it. Both are allreduced so every worker sees the global root.
//!
//! # Node histograms
//!
//! A node's histogram holds, for each candidate feature and bin, the class
//! counts (stride `n_classes`) or the mean-shifted regression sums
//! `(count, Σ(y − μ), Σ(y − μ)²)` (stride 3), where `μ` is the node's global
//! mean. Rows are accumulated in fixed chunks of [`HIST_CHUNK_ROWS`]
//! combined in chunk order, so every build path produces the same floating
//! sums.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::comm::{ReductionPoint, Reducer};
use crate::data::{BinnedTable, Response};
use crate::error::Result;
use crate::training::impurity::{ImpurityStore, Moments};
use crate::utils::Parallelism;

/// Rows per histogram accumulation chunk.
pub const HIST_CHUNK_ROWS: usize = 16 * 1024;

/// Regression histogram stride: count, shifted sum, shifted sum of squares.
pub const REGRESSION_STRIDE: usize = 3;

/// Number of `f64` statistics per bin.
#[inline]
pub fn stat_stride(response: &Response) -> usize {
    match response {
        Response::Classes { n_classes, .. } => *n_classes as usize,
        Response::Values(_) => REGRESSION_STRIDE,
    }
}

// =============================================================================
// Chunked accumulation
// =============================================================================

/// Fill `out` (zeroed) from `rows` in chunks of [`HIST_CHUNK_ROWS`].
///
/// The first chunk accumulates in place; later chunks accumulate into
/// private buffers that are added in chunk order.
pub(crate) fn accumulate_chunked<F>(out: &mut [f64], rows: &[u32], parallelism: Parallelism, fill: F)
where
    F: Fn(&mut [f64], &[u32]) + Sync + Send,
{
    if rows.len() <= HIST_CHUNK_ROWS {
        fill(out, rows);
        return;
    }

    let (first, rest) = rows.split_at(HIST_CHUNK_ROWS);
    let len = out.len();
    let rest: Vec<&[u32]> = rest.chunks(HIST_CHUNK_ROWS).collect();
    let partials = parallelism.maybe_par_map(rest, |chunk| {
        let mut partial = vec![0.0; len];
        fill(partial.as_mut_slice(), chunk);
        partial
    });

    fill(out, first);
    for partial in partials {
        out.iter_mut().zip(&partial).for_each(|(o, p)| *o += p);
    }
}

/// Accumulate one feature's histogram over `rows` (no chunking).
#[inline]
fn fill_feature(out: &mut [f64], table: &BinnedTable, rows: &[u32], feature: usize, response: &Response, shift: f64) {
    match response {
        Response::Classes { labels, n_classes } => {
            let k = *n_classes as usize;
            for &r in rows {
                let r = r as usize;
                let bin = table.bin(r, feature) as usize;
                out[bin * k + labels[r] as usize] += 1.0;
            }
        }
        Response::Values(values) => {
            for &r in rows {
                let r = r as usize;
                let base = table.bin(r, feature) as usize * REGRESSION_STRIDE;
                let d = values[r] - shift;
                out[base] += 1.0;
                out[base + 1] += d;
                out[base + 2] += d * d;
            }
        }
    }
}

// =============================================================================
// Layout and arena
// =============================================================================

/// Placement of each candidate feature's bins in a flat histogram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistogramLayout {
    features: Vec<u32>,
    offsets: Vec<usize>,
    lengths: Vec<usize>,
    stride: usize,
    total: usize,
}

impl HistogramLayout {
    /// Layout for `features` (ascending) of `table`.
    pub fn new(table: &BinnedTable, features: &[u32], stride: usize) -> Self {
        let mut offsets = Vec::with_capacity(features.len());
        let mut lengths = Vec::with_capacity(features.len());
        let mut total = 0;
        for &f in features {
            let len = table.n_bins(f as usize) as usize * stride;
            offsets.push(total);
            lengths.push(len);
            total += len;
        }
        Self {
            features: features.to_vec(),
            offsets,
            lengths,
            stride,
            total,
        }
    }

    #[inline]
    pub fn features(&self) -> &[u32] {
        &self.features
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Total number of `f64` entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Entry lengths of each feature segment.
    #[inline]
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// The segment of the `i`-th candidate feature.
    #[inline]
    pub fn segment<'h>(&self, hist: &'h [f64], i: usize) -> &'h [f64] {
        &hist[self.offsets[i]..self.offsets[i] + self.lengths[i]]
    }

    /// Largest bin count among the candidate features.
    pub fn max_bins(&self) -> usize {
        self.lengths.iter().map(|l| l / self.stride.max(1)).max().unwrap_or(0)
    }
}

/// Reusable histogram scratch of one worker task.
///
/// `reset` zeroes the buffer before each node so no statistics leak between
/// nodes or features.
#[derive(Debug, Clone, Default)]
pub struct SplitArena {
    data: Vec<f64>,
}

impl SplitArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the first `len` entries and make them the active buffer.
    pub fn reset(&mut self, len: usize) -> &mut [f64] {
        self.data.clear();
        self.data.resize(len, 0.0);
        &mut self.data
    }
}

// =============================================================================
// Node histogram builders
// =============================================================================

/// How a node histogram is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Separate pass over the rows per feature, features in parallel.
    PerFeature,
    /// One pass over the rows filling every feature.
    SinglePass,
}

/// Fill `hist` (zeroed, `layout.len()` entries) for a node's `rows`.
#[allow(clippy::too_many_arguments)]
pub fn build_node_histogram(
    hist: &mut [f64],
    layout: &HistogramLayout,
    table: &BinnedTable,
    rows: &[u32],
    response: &Response,
    shift: f64,
    mode: BuildMode,
    parallelism: Parallelism,
) {
    debug_assert_eq!(hist.len(), layout.len());
    match mode {
        BuildMode::PerFeature => {
            let segments = crate::utils::split_by_lengths_mut(hist, layout.lengths());
            let tasks: Vec<(&mut [f64], u32)> =
                segments.into_iter().zip(layout.features().iter().copied()).collect();
            parallelism
                .for_workload(tasks.len(), 2)
                .maybe_par_for_each(tasks, |(segment, feature)| {
                    accumulate_chunked(segment, rows, parallelism, |out, chunk| {
                        fill_feature(out, table, chunk, feature as usize, response, shift)
                    });
                });
        }
        BuildMode::SinglePass => {
            accumulate_chunked(hist, rows, parallelism, |out, chunk| {
                fill_all_features(out, layout, table, chunk, response, shift)
            });
        }
    }
}

/// One pass over `rows` filling every feature segment of `out`.
fn fill_all_features(
    out: &mut [f64],
    layout: &HistogramLayout,
    table: &BinnedTable,
    rows: &[u32],
    response: &Response,
    shift: f64,
) {
    let features = layout.features();
    match response {
        Response::Classes { labels, n_classes } => {
            let k = *n_classes as usize;
            for &r in rows {
                let r = r as usize;
                let label = labels[r] as usize;
                let codes = table.row(r);
                for (i, &f) in features.iter().enumerate() {
                    out[layout.offsets[i] + codes[f as usize] as usize * k + label] += 1.0;
                }
            }
        }
        Response::Values(values) => {
            for &r in rows {
                let r = r as usize;
                let d = values[r] - shift;
                let dd = d * d;
                let codes = table.row(r);
                for (i, &f) in features.iter().enumerate() {
                    let base = layout.offsets[i] + codes[f as usize] as usize * REGRESSION_STRIDE;
                    out[base] += 1.0;
                    out[base + 1] += d;
                    out[base + 2] += dd;
                }
            }
        }
    }
}

// =============================================================================
// Root statistics
// =============================================================================

/// Global statistics of every root of a tree block.
///
/// `roots[t]` holds the local rows of tree `t`; a worker with no rows for a
/// tree contributes zeros.
pub fn root_statistics(
    reducer: &mut Reducer<'_>,
    response: &Response,
    roots: &[&[u32]],
    shared_histogram_classes: u32,
    parallelism: Parallelism,
) -> Result<ImpurityStore> {
    match response {
        Response::Classes { labels, n_classes } => {
            let k = *n_classes as usize;
            let shared = *n_classes >= shared_histogram_classes;
            let per_tree: Vec<Vec<u64>> = roots
                .iter()
                .map(|rows| {
                    if shared {
                        class_counts_shared(labels, rows, k, parallelism)
                    } else {
                        class_counts_private(labels, rows, k, parallelism)
                    }
                })
                .collect();

            let mut flat: Vec<u64> = per_tree.concat();
            reducer.sum_u64(ReductionPoint::RootMoments, &mut flat)?;

            let mut store = ImpurityStore::new(*n_classes);
            for counts in flat.chunks_exact(k) {
                store.push_classes(counts);
            }
            Ok(store)
        }
        Response::Values(values) => {
            // Pass 1: (count, sum) per tree.
            let mut sums: Vec<f64> = Vec::with_capacity(2 * roots.len());
            for rows in roots {
                let mut cs = [0.0; 2];
                accumulate_chunked(&mut cs, rows, parallelism, |out, chunk| {
                    for &r in chunk {
                        out[0] += 1.0;
                        out[1] += values[r as usize];
                    }
                });
                sums.extend_from_slice(&cs);
            }
            reducer.sum_f64(ReductionPoint::RootMoments, &mut sums)?;

            let means: Vec<f64> = sums
                .chunks_exact(2)
                .map(|cs| if cs[0] > 0.0 { cs[1] / cs[0] } else { 0.0 })
                .collect();

            // Pass 2: squared deviations around the global mean.
            let mut deviations: Vec<f64> = roots
                .iter()
                .zip(&means)
                .map(|(rows, &mean)| {
                    let mut q = [0.0; 1];
                    accumulate_chunked(&mut q, rows, parallelism, |out, chunk| {
                        for &r in chunk {
                            let d = values[r as usize] - mean;
                            out[0] += d * d;
                        }
                    });
                    q[0]
                })
                .collect();
            reducer.sum_f64(ReductionPoint::RootDeviation, &mut deviations)?;

            let mut store = ImpurityStore::new(0);
            for ((cs, &mean), &m2) in sums.chunks_exact(2).zip(&means).zip(&deviations) {
                store.push_moments(Moments::new(cs[0] as u64, mean, m2));
            }
            Ok(store)
        }
    }
}

/// Class counts via private per-chunk histograms merged in order.
fn class_counts_private(labels: &[u32], rows: &[u32], k: usize, parallelism: Parallelism) -> Vec<u64> {
    let partials = parallelism
        .for_workload(rows.len(), 2 * HIST_CHUNK_ROWS)
        .maybe_par_map(rows.chunks(HIST_CHUNK_ROWS).collect::<Vec<_>>(), |chunk| {
            let mut counts = vec![0u64; k];
            for &r in chunk {
                counts[labels[r as usize] as usize] += 1;
            }
            counts
        });

    let mut counts = vec![0u64; k];
    for partial in partials {
        counts.iter_mut().zip(&partial).for_each(|(c, p)| *c += p);
    }
    counts
}

/// Class counts via one shared atomic histogram.
fn class_counts_shared(labels: &[u32], rows: &[u32], k: usize, parallelism: Parallelism) -> Vec<u64> {
    let counts: Vec<AtomicU64> = (0..k).map(|_| AtomicU64::new(0)).collect();
    parallelism
        .for_workload(rows.len(), 2 * HIST_CHUNK_ROWS)
        .maybe_par_for_each(rows.chunks(HIST_CHUNK_ROWS).collect::<Vec<_>>(), |chunk| {
            for &r in chunk {
                counts[labels[r as usize] as usize].fetch_add(1, Ordering::Relaxed);
            }
        });
    counts.into_iter().map(AtomicU64::into_inner).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_approx_eq;
    use crate::comm::SingleWorker;
    use crate::testing::{random_binned_table, synthetic_regression};
    use rstest::rstest;

    #[test]
    fn test_root_gini_matches_reference() {
        let labels: Vec<f64> = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let response = Response::classification(&labels, 2).unwrap();
        let rows: Vec<u32> = (0..8).collect();
        let comm = SingleWorker;
        let mut reducer = Reducer::new(&comm);

        let store = root_statistics(&mut reducer, &response, &[rows.as_slice()], 64, Parallelism::Sequential).unwrap();
        assert_eq!(store.class_counts(0), &[3, 5]);
        assert_approx_eq!(store.impurity(0), 0.46875, 1e-15);
        assert_eq!(reducer.count(ReductionPoint::RootMoments), 1);
    }

    #[rstest]
    #[case(2)]
    #[case(200)]
    fn test_private_and_shared_class_counts_agree(#[case] threshold: u32) {
        let labels: Vec<f64> = (0..50_000).map(|i| (i % 7) as f64).collect();
        let response = Response::classification(&labels, 7).unwrap();
        let rows: Vec<u32> = (0..50_000).rev().collect();
        let comm = SingleWorker;
        let mut reducer = Reducer::new(&comm);

        let store = root_statistics(&mut reducer, &response, &[rows.as_slice()], threshold, Parallelism::Parallel).unwrap();
        let mut expected = vec![0u64; 7];
        for &l in &labels {
            expected[l as usize] += 1;
        }
        assert_eq!(store.class_counts(0), expected.as_slice());
    }

    #[test]
    fn test_root_regression_two_pass() {
        let (_, targets) = synthetic_regression(1000, 2, 8, 3);
        let response = Response::regression(&targets).unwrap();
        let rows: Vec<u32> = (0..1000).collect();
        let comm = SingleWorker;
        let mut reducer = Reducer::new(&comm);

        let store = root_statistics(&mut reducer, &response, &[rows.as_slice(), &rows[..10]], 64, Parallelism::Sequential)
            .unwrap();
        let reference = Moments::from_values(targets.iter().copied());
        assert_eq!(store.row_count(0), 1000);
        assert_approx_eq!(store.moments(0).mean, reference.mean, 1e-9);
        assert_approx_eq!(store.impurity(0), reference.impurity(), 1e-9);
        assert_eq!(store.row_count(1), 10);
        assert_eq!(reducer.count(ReductionPoint::RootMoments), 1);
        assert_eq!(reducer.count(ReductionPoint::RootDeviation), 1);
    }

    #[test]
    fn test_empty_root() {
        let response = Response::regression(&[1.0, 2.0]).unwrap();
        let comm = SingleWorker;
        let mut reducer = Reducer::new(&comm);
        let empty: &[u32] = &[];
        let store = root_statistics(&mut reducer, &response, &[empty], 64, Parallelism::Sequential).unwrap();
        assert_eq!(store.row_count(0), 0);
        assert_eq!(store.impurity(0), 0.0);
    }

    #[rstest]
    #[case::few_rows(500)]
    #[case::chunked(40_000)]
    fn test_build_modes_agree(#[case] n_rows: usize) {
        let table = random_binned_table(n_rows, 4, 16, 11);
        let (_, targets) = synthetic_regression(n_rows, 4, 16, 11);
        let response = Response::regression(&targets).unwrap();
        let rows: Vec<u32> = (0..n_rows as u32).filter(|r| r % 3 != 0).collect();
        let layout = HistogramLayout::new(&table, &[0, 2, 3], REGRESSION_STRIDE);

        let mut per_feature = vec![0.0; layout.len()];
        build_node_histogram(
            &mut per_feature,
            &layout,
            &table,
            &rows,
            &response,
            0.25,
            BuildMode::PerFeature,
            Parallelism::Parallel,
        );
        let mut single_pass = vec![0.0; layout.len()];
        build_node_histogram(
            &mut single_pass,
            &layout,
            &table,
            &rows,
            &response,
            0.25,
            BuildMode::SinglePass,
            Parallelism::Sequential,
        );
        assert_eq!(per_feature, single_pass);

        // Counts of each feature sum to the row count.
        for i in 0..3 {
            let seg = layout.segment(&per_feature, i);
            let n: f64 = seg.chunks_exact(REGRESSION_STRIDE).map(|s| s[0]).sum();
            assert_eq!(n as usize, rows.len());
        }
    }

    #[test]
    fn test_arena_reset_zeroes() {
        let mut arena = SplitArena::new();
        arena.reset(4).fill(3.0);
        assert_eq!(arena.reset(2), &[0.0, 0.0]);
        assert_eq!(arena.reset(3).len(), 3);
    }
}
