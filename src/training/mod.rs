//! Level-wise forest training.
//!
//! ## Entry Points
//!
//! - [`ForestTrainer`]: single-worker and distributed training
//! - [`ForestConfig`]: training parameters (builder)
//! - [`TrainingResult`]: OOB error and variable importance
//! - [`TrainingLogger`], [`Verbosity`]: structured progress logging
//!
//! ## Engine Components
//!
//! - [`partition`]: row order double buffer and stable partitioning
//! - [`histogram`] / [`impurity`]: root statistics, node histograms, Gini and
//!   variance
//! - [`split`]: best and random split search with three execution strategies
//! - [`sampling`]: per-tree row draws and per-node feature subsets
//!
//! Node splitting, tree-block planning and OOB post-processing are internal
//! to the trainer.

mod block;
mod config;
pub mod histogram;
pub mod impurity;
mod logger;
mod node;
pub mod partition;
mod postprocess;
pub mod sampling;
pub mod split;
mod splitting;
mod trainer;

pub use config::{
    ConfigError, ForestConfig, Precision, ResultsToCompute, SplitMethod, SplitStrategy, Task,
    VariableImportance,
};
pub use logger::{TrainingLogger, Verbosity};
pub use partition::PartitionMode;
pub use postprocess::UNVISITED_ROW;
pub use trainer::{ForestTrainer, TrainingResult};
