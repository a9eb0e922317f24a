//! Error types for forest training.
//!
//! Training aborts with a [`TrainError`] on input-domain violations, resource
//! exhaustion and communication failures. Numerical edge cases (zero-variance
//! nodes, empty bins, zero row counts) are never errors: they resolve to
//! "no valid split" inside the splitter.

use crate::comm::CommError;
use crate::data::BinTableError;
use crate::model::ModelError;
use crate::training::ConfigError;

/// Errors raised by a training call.
///
/// None of these are recoverable within the call; the caller re-invokes
/// training with adjusted parameters or data.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// A size or count exceeds the addressable range, or is degenerate.
    #[error("{what} = {value} is outside the supported range (limit {limit})")]
    InputDomain {
        what: &'static str,
        value: u64,
        limit: u64,
    },

    /// Two inputs disagree on a shared dimension.
    #[error("shape mismatch: {what} has length {got}, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    /// A classification label is not an integral class id in range.
    #[error("row {row}: label {value} is not a class id in [0, {n_classes})")]
    InvalidLabel {
        row: usize,
        value: f64,
        n_classes: u32,
    },

    /// A regression target is NaN or infinite.
    #[error("row {row}: regression target is not finite")]
    NonFiniteTarget { row: usize },

    /// The binned table is malformed.
    #[error(transparent)]
    BinTable(#[from] BinTableError),

    /// Not even one tree's worst-case working set fits the memory budget.
    #[error("memory budget exhausted: one tree block needs {required} bytes, {available} available")]
    ResourceExhausted { required: u64, available: u64 },

    /// A collective operation failed.
    #[error(transparent)]
    Communication(#[from] CommError),

    /// The model manager rejected the finished levels.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The worker thread pool could not be created.
    #[error("failed to create thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Convenience alias for training results.
pub type Result<T, E = TrainError> = std::result::Result<T, E>;
