//! Binned feature table.
//!
//! Bin codes are stored row-major so that a single row (all features) is one
//! contiguous slice: this is what the single-pass splitter and model
//! traversal read. Column access strides by `n_features`.

use ndarray::Array2;

/// Errors detected while validating a binned table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BinTableError {
    #[error("bin count array has {got} entries for {expected} features")]
    BinCountLen { got: usize, expected: usize },

    #[error("border table array has {got} entries for {expected} features")]
    BorderLen { got: usize, expected: usize },

    #[error("feature {feature}: bin count must be at least 1")]
    EmptyFeature { feature: usize },

    #[error("feature {feature}: {got} borders for {expected} bins")]
    BorderCount {
        feature: usize,
        got: usize,
        expected: usize,
    },

    #[error("feature {feature}: borders are not monotone at bin {bin}")]
    NonMonotoneBorders { feature: usize, bin: usize },

    #[error("row {row}, feature {feature}: bin code {code} >= bin count {n_bins}")]
    CodeOutOfRange {
        row: usize,
        feature: usize,
        code: u32,
        n_bins: u32,
    },
}

/// Immutable binned feature table.
///
/// `codes[row * n_features + feature]` is the bin of `feature` in `row`.
/// Bin `b` of a feature covers raw values `<= borders[feature][b]` (and above
/// the previous border), so "bin <= b" and "value <= borders[b]" select the
/// same rows.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedTable {
    codes: Box<[u32]>,
    n_rows: usize,
    n_features: usize,
    bin_counts: Vec<u32>,
    borders: Vec<Vec<f64>>,
}

impl BinnedTable {
    /// Create a table from a `(n_rows, n_features)` code matrix.
    ///
    /// # Errors
    ///
    /// Returns [`BinTableError`] if the per-feature arrays disagree with the
    /// feature count, a border table is not monotone or has the wrong length,
    /// or a code is outside its feature's bin range.
    pub fn new(
        codes: Array2<u32>,
        bin_counts: Vec<u32>,
        borders: Vec<Vec<f64>>,
    ) -> Result<Self, BinTableError> {
        let (n_rows, n_features) = codes.dim();
        // Iteration over an Array2 is logical (row-major) order regardless of memory layout.
        let codes: Box<[u32]> = codes.iter().copied().collect();
        Self::from_row_major(codes, n_rows, n_features, bin_counts, borders)
    }

    /// Create a table from an already row-major code buffer.
    pub fn from_row_major(
        codes: impl Into<Box<[u32]>>,
        n_rows: usize,
        n_features: usize,
        bin_counts: Vec<u32>,
        borders: Vec<Vec<f64>>,
    ) -> Result<Self, BinTableError> {
        let codes = codes.into();
        debug_assert_eq!(codes.len(), n_rows * n_features);

        if bin_counts.len() != n_features {
            return Err(BinTableError::BinCountLen {
                got: bin_counts.len(),
                expected: n_features,
            });
        }
        if borders.len() != n_features {
            return Err(BinTableError::BorderLen {
                got: borders.len(),
                expected: n_features,
            });
        }

        for (feature, (&n_bins, feature_borders)) in bin_counts.iter().zip(&borders).enumerate() {
            if n_bins == 0 {
                return Err(BinTableError::EmptyFeature { feature });
            }
            if feature_borders.len() != n_bins as usize {
                return Err(BinTableError::BorderCount {
                    feature,
                    got: feature_borders.len(),
                    expected: n_bins as usize,
                });
            }
            if let Some(bin) = feature_borders.windows(2).position(|w| !(w[0] <= w[1])) {
                return Err(BinTableError::NonMonotoneBorders {
                    feature,
                    bin: bin + 1,
                });
            }
        }

        if n_features > 0 {
            for (row, row_codes) in codes.chunks_exact(n_features).enumerate() {
                for (feature, (&code, &n_bins)) in row_codes.iter().zip(&bin_counts).enumerate() {
                    if code >= n_bins {
                        return Err(BinTableError::CodeOutOfRange {
                            row,
                            feature,
                            code,
                            n_bins,
                        });
                    }
                }
            }
        }

        Ok(Self {
            codes,
            n_rows,
            n_features,
            bin_counts,
            borders,
        })
    }

    /// Number of rows.
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of features.
    #[inline]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Bin code of `feature` in `row`.
    #[inline]
    pub fn bin(&self, row: usize, feature: usize) -> u32 {
        self.codes[row * self.n_features + feature]
    }

    /// All bin codes of a row.
    #[inline]
    pub fn row(&self, row: usize) -> &[u32] {
        let start = row * self.n_features;
        &self.codes[start..start + self.n_features]
    }

    /// Number of bins of a feature.
    #[inline]
    pub fn n_bins(&self, feature: usize) -> u32 {
        self.bin_counts[feature]
    }

    /// Per-feature bin counts.
    #[inline]
    pub fn bin_counts(&self) -> &[u32] {
        &self.bin_counts
    }

    /// Largest bin count over all features.
    pub fn max_bins(&self) -> u32 {
        self.bin_counts.iter().copied().max().unwrap_or(0)
    }

    /// Per-feature border tables.
    #[inline]
    pub fn borders(&self) -> &[Vec<f64>] {
        &self.borders
    }

    /// Size of the code buffer in bytes.
    pub fn footprint_bytes(&self) -> u64 {
        (self.codes.len() * std::mem::size_of::<u32>()) as u64
    }

    /// Rows `[begin, end)` as a new table, keeping the bin metadata.
    ///
    /// Used to hand each simulated worker its slice of a global table.
    pub fn slice_rows(&self, begin: usize, end: usize) -> Self {
        let end = end.min(self.n_rows);
        let begin = begin.min(end);
        let codes: Box<[u32]> =
            self.codes[begin * self.n_features..end * self.n_features].into();
        Self {
            codes,
            n_rows: end - begin,
            n_features: self.n_features,
            bin_counts: self.bin_counts.clone(),
            borders: self.borders.clone(),
        }
    }
}
