//! Node impurity statistics.
//!
//! Classification nodes carry a class histogram and its Gini impurity.
//! Regression nodes carry `(count, mean, m2)` where `m2` is the unnormalized
//! sum of squared deviations from the mean, so partial statistics combine
//! exactly through the parallel variance identities and impurity is
//! `m2 / count`.

use crate::model::LEAF_MARK;
use crate::utils::argmax_first;

// =============================================================================
// Moments
// =============================================================================

/// Count, mean and centered second moment of a set of values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
}

impl Moments {
    pub fn new(count: u64, mean: f64, m2: f64) -> Self {
        Self { count, mean, m2 }
    }

    /// Welford accumulation over `values`.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut m = Self::default();
        for v in values {
            m.push(v);
        }
        m
    }

    /// Add one value.
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Statistics of the union of two disjoint sets.
    pub fn merge(&self, other: &Moments) -> Moments {
        if other.count == 0 {
            return *self;
        }
        if self.count == 0 {
            return *other;
        }
        let n = self.count + other.count;
        let (na, nb, nf) = (self.count as f64, other.count as f64, n as f64);
        let delta = other.mean - self.mean;
        Moments {
            count: n,
            mean: (na * self.mean + nb * other.mean) / nf,
            m2: self.m2 + other.m2 + delta * delta * na * nb / nf,
        }
    }

    /// Statistics of `self` with the subset `part` removed.
    ///
    /// Inverse of [`merge`](Self::merge): solves `self = merge(part, rest)`
    /// for `rest`. Rounding can push `m2` slightly below zero; it is clamped.
    pub fn subtract(&self, part: &Moments) -> Moments {
        if part.count >= self.count {
            return Moments::default();
        }
        if part.count == 0 {
            return *self;
        }
        let rest = self.count - part.count;
        let (n, np, nr) = (self.count as f64, part.count as f64, rest as f64);
        let mean = (n * self.mean - np * part.mean) / nr;
        let delta = mean - part.mean;
        let m2 = self.m2 - part.m2 - delta * delta * np * nr / n;
        Moments {
            count: rest,
            mean,
            m2: m2.max(0.0),
        }
    }

    /// Variance impurity `m2 / count`, 0 for an empty set.
    #[inline]
    pub fn impurity(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Moments from mean-shifted sums: `n` values with `s = Σ(y − shift)` and
    /// `q = Σ(y − shift)²`.
    #[inline]
    pub fn from_shifted_sums(n: f64, s: f64, q: f64, shift: f64) -> Moments {
        if n <= 0.0 {
            return Moments::default();
        }
        let mean_offset = s / n;
        Moments {
            count: n as u64,
            mean: shift + mean_offset,
            m2: (q - s * mean_offset).max(0.0),
        }
    }
}

// =============================================================================
// Gini
// =============================================================================

/// Gini impurity `1 − Σ (c_k / n)²` of integer class counts.
#[inline]
pub fn gini(counts: &[u64], total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    let sum_sq: f64 = counts.iter().map(|&c| (c as f64) * (c as f64)).sum();
    1.0 - sum_sq / (n * n)
}

// =============================================================================
// ImpurityStore
// =============================================================================

/// Global (all-worker) statistics of every node of a level, indexed by node.
#[derive(Debug, Clone, PartialEq)]
pub enum ImpurityStore {
    Classification {
        n_classes: usize,
        /// `n_nodes * n_classes` class counts.
        counts: Vec<u64>,
        gini: Vec<f64>,
    },
    Regression {
        count: Vec<u64>,
        mean: Vec<f64>,
        m2: Vec<f64>,
    },
}

impl ImpurityStore {
    /// Empty store for `n_classes` classes, or regression if 0.
    pub fn new(n_classes: u32) -> Self {
        if n_classes > 0 {
            Self::Classification {
                n_classes: n_classes as usize,
                counts: Vec::new(),
                gini: Vec::new(),
            }
        } else {
            Self::Regression {
                count: Vec::new(),
                mean: Vec::new(),
                m2: Vec::new(),
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Classification { gini, .. } => gini.len(),
            Self::Regression { count, .. } => count.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        match self {
            Self::Classification { counts, gini, .. } => {
                counts.clear();
                gini.clear();
            }
            Self::Regression { count, mean, m2 } => {
                count.clear();
                mean.clear();
                m2.clear();
            }
        }
    }

    /// Empty store of the same kind.
    pub fn empty_like(&self) -> Self {
        let mut out = self.clone();
        out.clear();
        out
    }

    /// Append a classification node.
    ///
    /// # Panics
    /// Panics on a regression store or a wrong class count length.
    pub fn push_classes(&mut self, class_counts: &[u64]) {
        match self {
            Self::Classification {
                n_classes,
                counts,
                gini: g,
            } => {
                assert_eq!(class_counts.len(), *n_classes);
                let total = class_counts.iter().sum();
                counts.extend_from_slice(class_counts);
                g.push(gini(class_counts, total));
            }
            Self::Regression { .. } => panic!("class counts pushed to a regression store"),
        }
    }

    /// Append a regression node.
    ///
    /// # Panics
    /// Panics on a classification store.
    pub fn push_moments(&mut self, m: Moments) {
        match self {
            Self::Regression { count, mean, m2 } => {
                count.push(m.count);
                mean.push(m.mean);
                m2.push(m.m2);
            }
            Self::Classification { .. } => panic!("moments pushed to a classification store"),
        }
    }

    /// Node impurity: Gini or `m2 / count`.
    #[inline]
    pub fn impurity(&self, node: usize) -> f64 {
        match self {
            Self::Classification { gini, .. } => gini[node],
            Self::Regression { .. } => self.moments(node).impurity(),
        }
    }

    /// Global row count of a node.
    #[inline]
    pub fn row_count(&self, node: usize) -> u64 {
        match self {
            Self::Classification { .. } => self.class_counts(node).iter().sum(),
            Self::Regression { count, .. } => count[node],
        }
    }

    /// Class counts of a node; empty for regression.
    #[inline]
    pub fn class_counts(&self, node: usize) -> &[u64] {
        match self {
            Self::Classification {
                n_classes, counts, ..
            } => &counts[node * n_classes..(node + 1) * n_classes],
            Self::Regression { .. } => &[],
        }
    }

    /// Moments of a node; default for classification.
    #[inline]
    pub fn moments(&self, node: usize) -> Moments {
        match self {
            Self::Regression { count, mean, m2 } => Moments::new(count[node], mean[node], m2[node]),
            Self::Classification { .. } => Moments::default(),
        }
    }

    /// Majority class (smallest on ties) or mean.
    pub fn response(&self, node: usize) -> f64 {
        match self {
            Self::Classification { .. } => {
                argmax_first(self.class_counts(node)) as f64
            }
            Self::Regression { mean, .. } => mean[node],
        }
    }

    /// Majority class of a node, `LEAF_MARK` for regression.
    pub fn winning_class(&self, node: usize) -> u32 {
        match self {
            Self::Classification { .. } => argmax_first(self.class_counts(node)) as u32,
            Self::Regression { .. } => LEAF_MARK,
        }
    }
}
