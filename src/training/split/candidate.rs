//! Split candidates, their evaluation and their ordering.
//!
//! A candidate "bin <= b" of a feature is evaluated from the cumulative
//! statistics of bins `0..=b` of the node's global histogram. The right side
//! is the parent minus the left side.

use crate::training::config::Precision;
use crate::training::impurity::{ImpurityStore, Moments};

// =============================================================================
// Parent statistics
// =============================================================================

/// Global statistics of the node being split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParentStats<'a> {
    Classes { counts: &'a [u64], gini: f64 },
    Values(Moments),
}

impl<'a> ParentStats<'a> {
    /// Statistics of node `node` of a level store.
    pub fn from_store(store: &'a ImpurityStore, node: usize) -> Self {
        match store {
            ImpurityStore::Classification { .. } => ParentStats::Classes {
                counts: store.class_counts(node),
                gini: store.impurity(node),
            },
            ImpurityStore::Regression { .. } => ParentStats::Values(store.moments(node)),
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        match self {
            ParentStats::Classes { counts, .. } => counts.iter().sum(),
            ParentStats::Values(m) => m.count,
        }
    }

    #[inline]
    pub fn impurity(&self) -> f64 {
        match self {
            ParentStats::Classes { gini, .. } => *gini,
            ParentStats::Values(m) => m.impurity(),
        }
    }

    /// Value the regression histogram is centered on; 0 for classes.
    #[inline]
    pub fn shift(&self) -> f64 {
        match self {
            ParentStats::Classes { .. } => 0.0,
            ParentStats::Values(m) => m.mean,
        }
    }
}

// =============================================================================
// SplitCandidate
// =============================================================================

/// One evaluated split "bin <= `bin`" of `feature`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitCandidate {
    pub feature: u32,
    pub bin: u32,
    pub left_count: u64,
    pub right_count: u64,
    pub left_impurity: f64,
    pub right_impurity: f64,
    pub impurity_decrease: f64,
}

impl SplitCandidate {
    /// Whether `self` replaces `best`.
    ///
    /// A larger decrease beyond `tolerance` wins; within tolerance the
    /// smaller feature, then the smaller bin, wins.
    #[inline]
    pub fn is_better_than(&self, best: &SplitCandidate, tolerance: f64) -> bool {
        let delta = self.impurity_decrease - best.impurity_decrease;
        if delta > tolerance {
            return true;
        }
        if delta.abs() <= tolerance {
            return self.feature < best.feature || (self.feature == best.feature && self.bin < best.bin);
        }
        false
    }
}

/// Fold `candidate` into `best`.
#[inline]
pub fn keep_better(best: Option<SplitCandidate>, candidate: Option<SplitCandidate>, tolerance: f64) -> Option<SplitCandidate> {
    match (best, candidate) {
        (Some(b), Some(c)) if c.is_better_than(&b, tolerance) => Some(c),
        (None, c) => c,
        (b, _) => b,
    }
}

/// Fold candidates in iteration order.
pub fn fold_best(candidates: impl IntoIterator<Item = Option<SplitCandidate>>, tolerance: f64) -> Option<SplitCandidate> {
    candidates
        .into_iter()
        .fold(None, |best, c| keep_better(best, c, tolerance))
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluates candidates of one node.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    parent: ParentStats<'a>,
    min_observations_in_leaf: u64,
    precision: Precision,
}

impl<'a> Evaluator<'a> {
    pub fn new(parent: ParentStats<'a>, min_observations_in_leaf: u64, precision: Precision) -> Self {
        Self {
            parent,
            min_observations_in_leaf,
            precision,
        }
    }

    #[inline]
    pub fn parent(&self) -> &ParentStats<'a> {
        &self.parent
    }

    #[inline]
    pub fn tolerance(&self) -> f64 {
        self.precision.tolerance()
    }

    /// Evaluate "bin <= `bin`" from the cumulative left statistics `left`
    /// (one histogram stride). `None` if a child is too small.
    pub fn evaluate(&self, feature: u32, bin: u32, left: &[f64]) -> Option<SplitCandidate> {
        let n = self.parent.count();
        if n == 0 {
            return None;
        }
        let min_leaf = self.min_observations_in_leaf.max(1);

        let (left_count, right_count, left_impurity, right_impurity, weighted) = match self.parent {
            ParentStats::Classes { counts, .. } => {
                let n_left: f64 = left.iter().sum();
                let left_count = n_left as u64;
                if left_count >= n {
                    return None;
                }
                let right_count = n - left_count;
                if left_count < min_leaf || right_count < min_leaf {
                    return None;
                }
                let n_right = right_count as f64;
                let (sq_left, sq_right) = left.iter().zip(counts).fold((0.0, 0.0), |(a, b), (&l, &p)| {
                    let r = p as f64 - l;
                    (a + l * l, b + r * r)
                });
                let imp_left = 1.0 - sq_left / (n_left * n_left);
                let imp_right = 1.0 - sq_right / (n_right * n_right);
                let weighted = (n_left * imp_left + n_right * imp_right) / n as f64;
                (left_count, right_count, imp_left, imp_right, weighted)
            }
            ParentStats::Values(parent) => {
                let left_m = Moments::from_shifted_sums(left[0], left[1], left[2], parent.mean);
                if left_m.count >= n {
                    return None;
                }
                let right_m = parent.subtract(&left_m);
                if left_m.count < min_leaf || right_m.count < min_leaf {
                    return None;
                }
                let weighted = (left_m.m2 + right_m.m2) / n as f64;
                (left_m.count, right_m.count, left_m.impurity(), right_m.impurity(), weighted)
            }
        };

        Some(SplitCandidate {
            feature,
            bin,
            left_count,
            right_count,
            left_impurity,
            right_impurity,
            impurity_decrease: self.precision.round(self.parent.impurity() - weighted),
        })
    }
}

/// Running sums over bins: `out[b]` holds the statistics of bins `0..=b`.
pub fn cumulate(segment: &[f64], stride: usize, out: &mut [f64]) {
    out.copy_from_slice(segment);
    for i in stride..out.len() {
        out[i] += out[i - stride];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(feature: u32, bin: u32, decrease: f64) -> SplitCandidate {
        SplitCandidate {
            feature,
            bin,
            left_count: 1,
            right_count: 1,
            left_impurity: 0.0,
            right_impurity: 0.0,
            impurity_decrease: decrease,
        }
    }

    #[test]
    fn test_tie_break_order() {
        let tol = Precision::Double.tolerance();
        let best = candidate(2, 5, 0.3);

        assert!(candidate(3, 0, 0.31).is_better_than(&best, tol));
        assert!(!candidate(1, 0, 0.29).is_better_than(&best, tol));
        // within tolerance: smaller feature, then smaller bin
        assert!(candidate(1, 9, 0.3 + 1e-12).is_better_than(&best, tol));
        assert!(candidate(2, 4, 0.3 - 1e-12).is_better_than(&best, tol));
        assert!(!candidate(2, 6, 0.3).is_better_than(&best, tol));
        assert!(!candidate(3, 0, 0.3).is_better_than(&best, tol));

        // single precision widens the tie band
        let loose = Precision::Single.tolerance();
        assert!(candidate(1, 0, 0.300_001).is_better_than(&best, loose));
        assert!(!candidate(1, 0, 0.300_001).is_better_than(&candidate(0, 0, 0.300_001 + 2e-5), loose));
    }

    #[test]
    fn test_fold_best() {
        let tol = 1e-10;
        let best = fold_best(
            [None, Some(candidate(0, 3, 0.1)), Some(candidate(1, 0, 0.2)), None, Some(candidate(0, 1, 0.2))],
            tol,
        );
        assert_eq!(best.map(|c| (c.feature, c.bin)), Some((0, 1)));
        assert_eq!(fold_best([None, None], tol), None);
    }

    #[test]
    fn test_evaluate_classes() {
        // parent 2 + 2, split puts both class-0 rows left
        let counts = [2u64, 2];
        let parent = ParentStats::Classes { counts: &counts, gini: 0.5 };
        let eval = Evaluator::new(parent, 1, Precision::Double);

        let c = eval.evaluate(0, 0, &[2.0, 0.0]).unwrap();
        assert_eq!((c.left_count, c.right_count), (2, 2));
        assert_eq!((c.left_impurity, c.right_impurity), (0.0, 0.0));
        assert_eq!(c.impurity_decrease, 0.5);

        // every row left is not a split
        assert!(eval.evaluate(0, 1, &[2.0, 2.0]).is_none());
        // child below the minimum
        let strict = Evaluator::new(parent, 3, Precision::Double);
        assert!(strict.evaluate(0, 0, &[2.0, 0.0]).is_none());
    }

    #[test]
    fn test_evaluate_values() {
        let parent = Moments::from_values([1.0, 2.0, 3.0, 4.0]);
        let eval = Evaluator::new(ParentStats::Values(parent), 1, Precision::Double);
        // left {1, 2} around the parent mean 2.5: d = -1.5, -0.5
        let left = [2.0, -2.0, 2.5];
        let c = eval.evaluate(0, 1, &left).unwrap();
        assert_eq!((c.left_count, c.right_count), (2, 2));
        assert!((c.left_impurity - 0.25).abs() < 1e-12);
        assert!((c.right_impurity - 0.25).abs() < 1e-12);
        assert!((c.impurity_decrease - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cumulate() {
        let mut out = [0.0; 6];
        cumulate(&[1.0, 0.0, 2.0, 1.0, 0.0, 3.0], 2, &mut out);
        assert_eq!(out, [1.0, 0.0, 3.0, 1.0, 3.0, 4.0]);
    }
}
