//! Named reduction points.
//!
//! Each collective issued during training is tagged with the statistic it
//! combines. With a single worker the reducer skips the communicator but
//! still records the point, so a single-node run and a distributed run can be
//! compared point by point.

use super::{CommError, Communicator};

/// A statistic combined across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReductionPoint {
    /// Trees per block each worker can afford, one slot per rank.
    BlockPlan,
    /// Root class counts, or regression `(count, sum)` of every root.
    RootMoments,
    /// Regression sum of squared deviations around the global root mean.
    RootDeviation,
    /// Per-(node, feature, bin) statistics of one level's split search.
    SplitHistograms,
    /// Observed bin range of each random-split candidate, one slot pair per rank.
    SplitRanges,
    /// Left-child statistics of each drawn random-split threshold.
    SplitThresholds,
    /// Baseline and permuted out-of-bag errors of one tree.
    TreeOobErrors,
    /// Final out-of-bag error sums and visited-row counts.
    OobTotals,
}

/// Tags and forwards collectives; keeps the ordered trace of points.
pub struct Reducer<'a> {
    comm: &'a dyn Communicator,
    trace: Vec<(ReductionPoint, usize)>,
}

impl<'a> Reducer<'a> {
    pub fn new(comm: &'a dyn Communicator) -> Self {
        Self {
            comm,
            trace: Vec::new(),
        }
    }

    /// The underlying communicator.
    pub fn comm(&self) -> &'a dyn Communicator {
        self.comm
    }

    /// Returns `true` if more than one worker participates.
    pub fn is_distributed(&self) -> bool {
        self.comm.is_distributed()
    }

    /// Sum `buf` over all workers at `point`.
    pub fn sum_f64(&mut self, point: ReductionPoint, buf: &mut [f64]) -> Result<(), CommError> {
        self.record(point, buf.len());
        if self.comm.is_distributed() {
            self.comm.allreduce_sum_f64(buf)?;
        }
        Ok(())
    }

    /// Sum `buf` over all workers at `point`.
    pub fn sum_u64(&mut self, point: ReductionPoint, buf: &mut [u64]) -> Result<(), CommError> {
        self.record(point, buf.len());
        if self.comm.is_distributed() {
            self.comm.allreduce_sum_u64(buf)?;
        }
        Ok(())
    }

    fn record(&mut self, point: ReductionPoint, len: usize) {
        tracing::trace!(rank = self.comm.rank(), ?point, len, "reduction point");
        self.trace.push((point, len));
    }

    /// Points issued so far with their buffer lengths.
    pub fn trace(&self) -> &[(ReductionPoint, usize)] {
        &self.trace
    }

    /// Number of times `point` was issued.
    pub fn count(&self, point: ReductionPoint) -> usize {
        self.trace.iter().filter(|(p, _)| *p == point).count()
    }
}
