//! Per-node split search.
//!
//! Every worker searches the same nodes of a level with the same candidate
//! features, and the statistics a search needs are summed across workers
//! before any candidate is evaluated, so all workers pick the same splits.
//!
//! The exhaustive search ([`BestSplitter`]) runs in three phases:
//!
//! 1. every node that may split builds its local histogram over its
//!    candidate features (one flat buffer for the whole level),
//! 2. the buffer is summed across workers in a single collective,
//! 3. every node scans its global histogram.
//!
//! The histogram builder and the scan mode are chosen per node from
//! [`SplitStrategy`]; every choice yields the same split. The randomized
//! search ([`RandomSplitter`]) builds no histogram; see its module.
//!
//! # Strategies
//!
//! | Strategy      | Histogram build          | Scan                     |
//! |---------------|--------------------------|--------------------------|
//! | `FeatureTask` | one task per feature     | one task per feature     |
//! | `BinBlocked`  | one task per feature     | bin blocks in parallel   |
//! | `SinglePass`  | one pass fills all       | one task per feature     |

mod best;
mod candidate;
mod random;

pub use best::{BestSplitter, BIN_BLOCK};
pub use candidate::{cumulate, fold_best, keep_better, Evaluator, ParentStats, SplitCandidate};
pub use random::{draw_bin, global_bin_ranges, RandomSplitter};

use crate::comm::{ReductionPoint, Reducer};
use crate::data::{BinnedTable, Response};
use crate::error::Result;
use crate::random::RandomEngine;
use crate::training::config::{ForestConfig, Precision, SplitMethod, SplitStrategy};
use crate::training::histogram::{build_node_histogram, stat_stride, BuildMode, HistogramLayout, HIST_CHUNK_ROWS};
use crate::utils::{split_by_lengths_mut, Parallelism};

// =============================================================================
// Search interface
// =============================================================================

/// Identifies a node for keyed random streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeKey {
    /// Global tree index.
    pub tree: u64,
    pub level: u32,
    /// Position within the tree's level.
    pub position: u64,
}

/// How a node's global histogram is scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Serial,
    BinBlocked,
}

/// The global histogram of one node, ready to scan.
#[derive(Debug, Clone, Copy)]
pub struct NodeHistogram<'a> {
    pub hist: &'a [f64],
    pub layout: &'a HistogramLayout,
    pub parent: ParentStats<'a>,
    pub scan: ScanMode,
}

/// Level-wide scan parameters.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext {
    pub min_observations_in_leaf: u64,
    pub parallelism: Parallelism,
}

/// Chooses the splits of a level.
pub trait SplitSearch: Send + Sync {
    fn method(&self) -> SplitMethod;

    /// One result per request, in order; `None` if every candidate of the
    /// node is rejected.
    ///
    /// Collective: every worker calls this with the same requests.
    fn search_level(
        &self,
        level: &LevelSearch<'_>,
        reducer: &mut Reducer<'_>,
        requests: &[SearchRequest<'_>],
    ) -> Result<Vec<Option<ChosenSplit>>>;
}

/// Creates the split search for a method.
pub struct SplitterFactory;

impl SplitterFactory {
    pub fn create(method: SplitMethod, precision: Precision) -> Box<dyn SplitSearch> {
        match method {
            SplitMethod::Best => Box::new(BestSplitter::new(precision)),
            SplitMethod::Random => Box::new(RandomSplitter::new(precision)),
        }
    }
}

/// Histogram build and scan mode for a node.
pub fn resolve_strategy(
    strategy: SplitStrategy,
    local_rows: usize,
    max_bins: usize,
    fast_memory_rows: usize,
    bin_block_threshold: u32,
) -> (BuildMode, ScanMode) {
    match strategy {
        SplitStrategy::FeatureTask => (BuildMode::PerFeature, ScanMode::Serial),
        SplitStrategy::BinBlocked => (BuildMode::PerFeature, ScanMode::BinBlocked),
        SplitStrategy::SinglePass => (BuildMode::SinglePass, ScanMode::Serial),
        SplitStrategy::Auto => {
            if local_rows <= fast_memory_rows.min(HIST_CHUNK_ROWS) {
                (BuildMode::SinglePass, ScanMode::Serial)
            } else if max_bins >= bin_block_threshold as usize {
                (BuildMode::PerFeature, ScanMode::BinBlocked)
            } else {
                (BuildMode::PerFeature, ScanMode::Serial)
            }
        }
    }
}

// =============================================================================
// Level search
// =============================================================================

/// A node whose split is searched this level.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    /// Local rows of the node.
    pub rows: &'a [u32],
    /// Candidate features, ascending.
    pub features: Vec<u32>,
    pub parent: ParentStats<'a>,
    pub key: NodeKey,
}

/// Runs the split search of one level.
pub struct LevelSearch<'a> {
    table: &'a BinnedTable,
    response: &'a Response,
    config: &'a ForestConfig,
    splitter: &'a dyn SplitSearch,
    rng: &'a RandomEngine,
    parallelism: Parallelism,
}

impl<'a> LevelSearch<'a> {
    pub fn new(
        table: &'a BinnedTable,
        response: &'a Response,
        config: &'a ForestConfig,
        splitter: &'a dyn SplitSearch,
        rng: &'a RandomEngine,
        parallelism: Parallelism,
    ) -> Self {
        Self {
            table,
            response,
            config,
            splitter,
            rng,
            parallelism,
        }
    }

    /// Search every request; one result per request, in order.
    ///
    /// Splits whose decrease falls below `min_impurity_decrease` are
    /// dropped. No collective is issued when `requests` is empty.
    pub fn run(&self, reducer: &mut Reducer<'_>, requests: &[SearchRequest<'_>]) -> Result<Vec<Option<ChosenSplit>>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let min_decrease = self.config.min_impurity_decrease;
        let found = self.splitter.search_level(self, reducer, requests)?;
        Ok(found
            .into_iter()
            .map(|chosen| chosen.filter(|c| c.candidate.impurity_decrease >= min_decrease))
            .collect())
    }

    /// Build, allreduce and scan the histograms of every request.
    ///
    /// Issues exactly one [`ReductionPoint::SplitHistograms`] collective.
    pub fn histogram_search<F>(
        &self,
        reducer: &mut Reducer<'_>,
        requests: &[SearchRequest<'_>],
        scan: F,
    ) -> Result<Vec<Option<ChosenSplit>>>
    where
        F: Fn(&NodeHistogram<'_>, &ScanContext) -> Option<SplitCandidate> + Sync,
    {
        let config = self.config;
        let stride = stat_stride(self.response);

        let layouts: Vec<HistogramLayout> = requests
            .iter()
            .map(|r| HistogramLayout::new(self.table, &r.features, stride))
            .collect();
        let modes: Vec<(BuildMode, ScanMode)> = requests
            .iter()
            .zip(&layouts)
            .map(|(r, layout)| {
                resolve_strategy(
                    config.split_strategy,
                    r.rows.len(),
                    layout.max_bins(),
                    config.fast_memory_rows,
                    config.bin_block_threshold,
                )
            })
            .collect();
        let lengths: Vec<usize> = layouts.iter().map(HistogramLayout::len).collect();

        let mut flat = vec![0.0; lengths.iter().sum()];
        {
            let work: Vec<_> = split_by_lengths_mut(&mut flat, &lengths)
                .into_iter()
                .zip(requests)
                .zip(layouts.iter().zip(&modes))
                .collect();
            let (table, response, parallelism) = (self.table, self.response, self.parallelism);
            parallelism.maybe_par_for_each(work, |((hist, request), (layout, &(build, _)))| {
                build_node_histogram(
                    hist,
                    layout,
                    table,
                    request.rows,
                    response,
                    request.parent.shift(),
                    build,
                    parallelism,
                );
            });
        }

        reducer.sum_f64(ReductionPoint::SplitHistograms, &mut flat)?;

        let ctx = ScanContext {
            min_observations_in_leaf: config.min_observations_in_leaf,
            parallelism: self.parallelism,
        };
        let mut nodes = Vec::with_capacity(requests.len());
        let mut offset = 0;
        for ((request, layout), &(_, scan)) in requests.iter().zip(&layouts).zip(&modes) {
            nodes.push(NodeHistogram {
                hist: &flat[offset..offset + layout.len()],
                layout,
                parent: request.parent,
                scan,
            });
            offset += layout.len();
        }

        Ok(self.parallelism.maybe_par_map(nodes, |node| {
            scan(&node, &ctx).map(|candidate| ChosenSplit {
                left_stats: left_stats(&node, &candidate),
                candidate,
            })
        }))
    }
}

/// A chosen split with the global statistics of its left child.
#[derive(Debug, Clone, PartialEq)]
pub struct ChosenSplit {
    pub candidate: SplitCandidate,
    /// Histogram statistics (one stride) of the rows going left.
    pub left_stats: Vec<f64>,
}

/// Sum of the chosen feature's bins `0..=bin`.
fn left_stats(node: &NodeHistogram<'_>, candidate: &SplitCandidate) -> Vec<f64> {
    let stride = node.layout.stride();
    let mut out = vec![0.0; stride];
    if let Ok(i) = node.layout.features().binary_search(&candidate.feature) {
        let segment = node.layout.segment(node.hist, i);
        for cell in segment[..(candidate.bin as usize + 1) * stride].chunks_exact(stride) {
            out.iter_mut().zip(cell).for_each(|(o, &c)| *o += c);
        }
    }
    out
}
