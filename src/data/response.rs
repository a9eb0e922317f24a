//! Validated training response and worker row ownership.

use crate::error::TrainError;

/// Training response, validated against the task.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Class ids in `[0, n_classes)`.
    Classes { labels: Vec<u32>, n_classes: u32 },
    /// Finite regression targets.
    Values(Vec<f64>),
}

impl Response {
    /// Validate classification labels.
    ///
    /// Labels are given as `f64` and must be integral values in `[0, n_classes)`.
    pub fn classification(labels: &[f64], n_classes: u32) -> Result<Self, TrainError> {
        let labels = labels
            .iter()
            .enumerate()
            .map(|(row, &value)| {
                if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value < n_classes as f64 {
                    Ok(value as u32)
                } else {
                    Err(TrainError::InvalidLabel {
                        row,
                        value,
                        n_classes,
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Classes { labels, n_classes })
    }

    /// Validate regression targets (must be finite).
    pub fn regression(values: &[f64]) -> Result<Self, TrainError> {
        if let Some(row) = values.iter().position(|v| !v.is_finite()) {
            return Err(TrainError::NonFiniteTarget { row });
        }
        Ok(Self::Values(values.to_vec()))
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Self::Classes { labels, .. } => labels.len(),
            Self::Values(values) => values.len(),
        }
    }

    /// Returns `true` if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of classes, or `None` for regression.
    pub fn n_classes(&self) -> Option<u32> {
        match self {
            Self::Classes { n_classes, .. } => Some(*n_classes),
            Self::Values(_) => None,
        }
    }

    /// Response of a row as `f64` (class id for classification).
    #[inline]
    pub fn value(&self, row: usize) -> f64 {
        match self {
            Self::Classes { labels, .. } => labels[row] as f64,
            Self::Values(values) => values[row],
        }
    }

    /// Size of the response buffer in bytes.
    pub fn footprint_bytes(&self) -> u64 {
        match self {
            Self::Classes { labels, .. } => (labels.len() * std::mem::size_of::<u32>()) as u64,
            Self::Values(values) => (values.len() * std::mem::size_of::<f64>()) as u64,
        }
    }
}

/// The contiguous range of global rows owned by one worker.
///
/// Single-worker training owns `[0, global_rows)`. In distributed training
/// every worker draws bootstrap samples over all `global_rows` with the same
/// seed and keeps the draws that fall in its own range, so the local sample
/// size of a tree differs per worker while the global size is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRows {
    /// Total number of rows across all workers.
    pub global_rows: usize,
    /// First global row owned by this worker.
    pub begin: usize,
    /// Number of rows owned by this worker.
    pub len: usize,
}

impl WorkerRows {
    /// A worker that owns every row.
    pub fn single(n_rows: usize) -> Self {
        Self {
            global_rows: n_rows,
            begin: 0,
            len: n_rows,
        }
    }

    /// Even split of `global_rows` over `n_workers`; the first workers get
    /// one extra row when the split is uneven.
    pub fn even_split(global_rows: usize, n_workers: usize, rank: usize) -> Self {
        let base = global_rows / n_workers;
        let extra = global_rows % n_workers;
        let len = base + usize::from(rank < extra);
        let begin = rank * base + rank.min(extra);
        Self {
            global_rows,
            begin,
            len,
        }
    }

    /// End of the owned range (exclusive).
    #[inline]
    pub fn end(&self) -> usize {
        self.begin + self.len
    }

    /// Local index of a global row, if this worker owns it.
    #[inline]
    pub fn to_local(&self, global_row: usize) -> Option<u32> {
        (global_row >= self.begin && global_row < self.end()).then(|| (global_row - self.begin) as u32)
    }
}
