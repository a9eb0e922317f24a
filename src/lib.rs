//! binforest: level-wise histogram-based decision forest training.
//!
//! This crate grows ensembles of classification and regression trees over
//! pre-binned tabular data. Trees of a block are grown together, one level at
//! a time: every active node searches its best split over per-bin histograms,
//! split nodes produce two children whose statistics are derived by
//! subtraction, and the row order is repartitioned so each node owns a
//! contiguous row range.
//!
//! # Key Types
//!
//! - [`BinnedTable`] - Binned feature codes consumed by training
//! - [`ForestConfig`] - Training configuration (builder pattern)
//! - [`ForestTrainer`] - Single-worker and distributed training entry points
//! - [`Forest`] / [`ModelManager`] - Model storage fed with finished levels
//! - [`Communicator`] - Sum-allreduce used by distributed training
//!
//! # Training
//!
//! ```ignore
//! use binforest::{BinnedTable, Forest, ForestConfig, ForestTrainer, Task};
//!
//! let config = ForestConfig::builder()
//!     .task(Task::Classification { n_classes: 2 })
//!     .n_trees(50)
//!     .build()?;
//! let mut forest = Forest::new(config.task, table.n_features());
//! let result = ForestTrainer::new(config).train(&table, &labels, &mut forest)?;
//! ```

// Re-export approx traits for users who want to compare predictions
pub use approx;

pub mod comm;
pub mod data;
pub mod error;
pub mod model;
pub mod random;
pub mod testing;
pub mod training;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use comm::{Communicator, ReductionPoint, SingleWorker, ThreadGroup};
pub use data::{BinTableError, BinnedTable, Response, WorkerRows};
pub use error::TrainError;
pub use model::{Forest, LevelRecord, ModelManager, NodeRecord};
pub use training::{
    ConfigError, ForestConfig, ForestTrainer, PartitionMode, Precision, ResultsToCompute,
    SplitMethod, SplitStrategy, Task, TrainingResult, VariableImportance, Verbosity,
};
pub use utils::{run_with_threads, Parallelism};
