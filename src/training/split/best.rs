//! Exhaustive split search over every bin of every candidate feature.
//!
//! Candidates are folded in a fixed order: bins ascending within a feature,
//! then the per-feature bests in ascending feature order. Both scan modes
//! follow that order, so they pick the same split.

use std::ops::Range;

use super::candidate::{cumulate, fold_best, Evaluator, SplitCandidate};
use super::{ChosenSplit, LevelSearch, NodeHistogram, ScanContext, ScanMode, SearchRequest, SplitSearch};
use crate::comm::Reducer;
use crate::error::Result;
use crate::training::config::{Precision, SplitMethod};
use crate::training::histogram::SplitArena;
use crate::utils::Parallelism;

/// Bins evaluated by one task of a blocked scan.
pub const BIN_BLOCK: usize = 256;

/// Best split by exhaustive scan.
#[derive(Debug, Clone, Copy)]
pub struct BestSplitter {
    precision: Precision,
}

impl BestSplitter {
    pub fn new(precision: Precision) -> Self {
        Self { precision }
    }

    /// Best valid candidate of one global histogram.
    pub fn find_split(&self, node: &NodeHistogram<'_>, ctx: &ScanContext) -> Option<SplitCandidate> {
        let eval = Evaluator::new(node.parent, ctx.min_observations_in_leaf, self.precision);
        let layout = node.layout;
        let stride = layout.stride();
        let features = layout.features();

        let per_feature = ctx
            .parallelism
            .for_workload(features.len(), 2)
            .maybe_par_map_init(0..features.len(), SplitArena::new, |arena, i| {
                let segment = layout.segment(node.hist, i);
                let cumulative = arena.reset(segment.len());
                cumulate(segment, stride, cumulative);
                match node.scan {
                    ScanMode::Serial => scan_serial(&eval, features[i], cumulative, stride),
                    ScanMode::BinBlocked => scan_blocked(&eval, features[i], cumulative, stride, ctx.parallelism),
                }
            });

        fold_best(per_feature, eval.tolerance())
    }
}

impl SplitSearch for BestSplitter {
    fn method(&self) -> SplitMethod {
        SplitMethod::Best
    }

    fn search_level(
        &self,
        level: &LevelSearch<'_>,
        reducer: &mut Reducer<'_>,
        requests: &[SearchRequest<'_>],
    ) -> Result<Vec<Option<ChosenSplit>>> {
        level.histogram_search(reducer, requests, |node, ctx| self.find_split(node, ctx))
    }
}

/// Candidate bins of a feature: every bin but the last.
#[inline]
fn split_bins(cumulative: &[f64], stride: usize) -> usize {
    (cumulative.len() / stride).saturating_sub(1)
}

#[inline]
fn evaluate_bin(eval: &Evaluator<'_>, feature: u32, cumulative: &[f64], stride: usize, bin: usize) -> Option<SplitCandidate> {
    eval.evaluate(feature, bin as u32, &cumulative[bin * stride..(bin + 1) * stride])
}

fn scan_serial(eval: &Evaluator<'_>, feature: u32, cumulative: &[f64], stride: usize) -> Option<SplitCandidate> {
    let bins = 0..split_bins(cumulative, stride);
    fold_best(
        bins.map(|b| evaluate_bin(eval, feature, cumulative, stride, b)),
        eval.tolerance(),
    )
}

/// Evaluate blocks of bins in parallel, then fold every bin in order.
fn scan_blocked(
    eval: &Evaluator<'_>,
    feature: u32,
    cumulative: &[f64],
    stride: usize,
    parallelism: Parallelism,
) -> Option<SplitCandidate> {
    let n = split_bins(cumulative, stride);
    let blocks: Vec<Range<usize>> = (0..n)
        .step_by(BIN_BLOCK)
        .map(|start| start..(start + BIN_BLOCK).min(n))
        .collect();

    let evaluated: Vec<Vec<Option<SplitCandidate>>> = parallelism
        .for_workload(blocks.len(), 2)
        .maybe_par_map(blocks, |bins| {
            bins.map(|b| evaluate_bin(eval, feature, cumulative, stride, b))
                .collect()
        });

    fold_best(evaluated.into_iter().flatten(), eval.tolerance())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::histogram::HistogramLayout;
    use crate::training::split::candidate::ParentStats;
    use crate::testing::random_binned_table;

    #[test]
    fn test_scan_modes_agree_on_tied_features() {
        // Both features carry the same histogram, so feature 0 wins the tie
        // in both modes.
        let table = random_binned_table(10, 2, 600, 1);
        let layout = HistogramLayout::new(&table, &[0, 1], 2);
        let mut hist = vec![0.0; layout.len()];
        for b in 0..600 {
            hist[b * 2 + (b % 2)] = 1.0;
            hist[1200 + b * 2 + (b % 2)] = 1.0;
        }
        let counts = [300u64, 300];
        let parent = ParentStats::Classes { counts: &counts, gini: 0.5 };
        let ctx = ScanContext {
            min_observations_in_leaf: 1,
            parallelism: Parallelism::Parallel,
        };

        let splitter = BestSplitter::new(Precision::Double);
        let mut results = Vec::new();
        for scan in [ScanMode::Serial, ScanMode::BinBlocked] {
            let node = NodeHistogram {
                hist: &hist,
                layout: &layout,
                parent,
                scan,
            };
            results.push(splitter.find_split(&node, &ctx));
        }
        assert_eq!(results[0], results[1]);
        let best = results[0].unwrap();
        assert_eq!(best.feature, 0);
        assert!(best.impurity_decrease >= 0.0);
    }
}
