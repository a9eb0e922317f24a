//! Forest training configuration with builder pattern.
//!
//! [`ForestConfig`] gathers every training parameter. It uses the `bon` crate
//! for builder generation and validates on `build()`.
//!
//! # Example
//!
//! ```
//! use binforest::{ForestConfig, ResultsToCompute, SplitMethod, Task, VariableImportance};
//!
//! // Defaults apart from the task
//! let config = ForestConfig::builder().task(Task::Regression).build().unwrap();
//! assert_eq!(config.n_trees, 100);
//!
//! // Extremely randomized classification trees with OOB statistics
//! let config = ForestConfig::builder()
//!     .task(Task::Classification { n_classes: 3 })
//!     .n_trees(200)
//!     .max_depth(12)
//!     .split_method(SplitMethod::Random)
//!     .results(ResultsToCompute {
//!         oob_error: true,
//!         oob_error_per_row: false,
//!         variable_importance: VariableImportance::MdaScaled,
//!     })
//!     .build()
//!     .unwrap();
//! ```

use bon::Builder;

use super::logger::Verbosity;
use super::partition::PartitionMode;

// =============================================================================
// Enums
// =============================================================================

/// Learning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Class labels in `[0, n_classes)`, Gini impurity.
    Classification { n_classes: u32 },
    /// Real-valued targets, variance impurity.
    Regression,
}

impl Task {
    /// Number of classes; 0 for regression.
    #[inline]
    pub fn n_classes(&self) -> u32 {
        match self {
            Task::Classification { n_classes } => *n_classes,
            Task::Regression => 0,
        }
    }

    #[inline]
    pub fn is_classification(&self) -> bool {
        matches!(self, Task::Classification { .. })
    }
}

/// How a node picks its split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SplitMethod {
    /// Scan every bin of every candidate feature.
    #[default]
    Best,
    /// One uniformly drawn bin per candidate feature (extremely randomized trees).
    Random,
}

/// Execution strategy of the best-split search.
///
/// Every strategy returns the same split for the same node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SplitStrategy {
    /// Choose per node from row count and bin count.
    #[default]
    Auto,
    /// One task per candidate feature, scanning all bins serially.
    FeatureTask,
    /// Bin ranges of a feature evaluated by separate tasks, partial bests merged.
    BinBlocked,
    /// One pass over the node's rows fills every candidate histogram.
    SinglePass,
}

/// Floating precision of impurity-decrease comparisons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precision {
    Single,
    #[default]
    Double,
}

impl Precision {
    /// Tolerance under which two impurity decreases are considered equal.
    #[inline]
    pub fn tolerance(self) -> f64 {
        match self {
            Precision::Single => 1e-5,
            Precision::Double => 1e-10,
        }
    }

    /// Round a value to the working precision.
    #[inline]
    pub fn round(self, value: f64) -> f64 {
        match self {
            Precision::Single => value as f32 as f64,
            Precision::Double => value,
        }
    }
}

/// Variable importance measure to compute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VariableImportance {
    #[default]
    None,
    /// Mean decrease in impurity.
    Mdi,
    /// Mean decrease in accuracy (permutation), raw mean.
    MdaRaw,
    /// Mean decrease in accuracy divided by its standard error.
    MdaScaled,
}

impl VariableImportance {
    /// Returns `true` for the permutation measures.
    #[inline]
    pub fn is_permutation(self) -> bool {
        matches!(self, Self::MdaRaw | Self::MdaScaled)
    }
}

/// Optional outputs of a training run. Nothing is computed unless requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultsToCompute {
    /// Out-of-bag error over rows with at least one OOB prediction.
    pub oob_error: bool,
    /// Per-row OOB error, `-1.0` for rows never out of bag.
    pub oob_error_per_row: bool,
    pub variable_importance: VariableImportance,
}

impl ResultsToCompute {
    /// Returns `true` if any output needs per-tree out-of-bag rows.
    #[inline]
    pub fn needs_oob(&self) -> bool {
        self.oob_error || self.oob_error_per_row || self.variable_importance.is_permutation()
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("n_trees must be at least 1")]
    InvalidNTrees,

    #[error("classification needs at least 2 classes, got {0}")]
    InvalidClassCount(u32),

    #[error("{field} must be at least {min}, got {value}")]
    TooSmall {
        field: &'static str,
        value: u64,
        min: u64,
    },

    #[error("observations_per_tree_fraction must be in (0, 1], got {0}")]
    InvalidFraction(f64),

    #[error("{field} must be finite and non-negative, got {value}")]
    InvalidThreshold { field: &'static str, value: f64 },
}

// =============================================================================
// ForestConfig
// =============================================================================

/// Configuration of a forest training run.
///
/// # Structure
///
/// - **Task**: classification or regression
/// - **Forest**: number of trees, sampling of rows and features
/// - **Tree**: depth and node-size limits, split acceptance thresholds
/// - **Split search**: method, execution strategy and precision
/// - **Resources**: memory budget, threads, partitioning mode
/// - **Outputs**: optional OOB error and variable importance
#[derive(Debug, Clone, Builder)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct ForestConfig {
    // === Task ===
    pub task: Task,

    // === Forest ===
    /// Number of trees. Default: 100.
    #[builder(default = 100)]
    pub n_trees: u32,

    /// Fraction of the global row count drawn per tree. Default: 1.0.
    #[builder(default = 1.0)]
    pub observations_per_tree_fraction: f64,

    /// Draw rows with replacement. Default: true.
    #[builder(default = true)]
    pub bootstrap: bool,

    /// Candidate features per node. `None` uses `floor(sqrt(p))` for
    /// classification and `p / 3` for regression, at least 1.
    pub features_per_node: Option<u32>,

    // === Tree ===
    /// Maximum tree depth, 0 for unlimited. Default: 0.
    #[builder(default = 0)]
    pub max_depth: u32,

    /// Minimum rows in each child of a split. Default: 1.
    #[builder(default = 1)]
    pub min_observations_in_leaf: u64,

    /// Minimum rows of a node to be split. Default: 2.
    #[builder(default = 2)]
    pub min_observations_in_split: u64,

    /// Nodes with impurity below this value are leaves. Default: 0.
    #[builder(default = 0.0)]
    pub impurity_threshold: f64,

    /// Minimum impurity decrease of an accepted split. Default: 0.
    #[builder(default = 0.0)]
    pub min_impurity_decrease: f64,

    // === Split search ===
    #[builder(default)]
    pub split_method: SplitMethod,

    #[builder(default)]
    pub split_strategy: SplitStrategy,

    #[builder(default)]
    pub precision: Precision,

    /// Row count up to which `Auto` uses the single-pass histogram builder.
    /// Default: 4096.
    #[builder(default = 4096)]
    pub fast_memory_rows: usize,

    /// Bin count from which `Auto` evaluates bins in parallel blocks.
    /// Default: 1024.
    #[builder(default = 1024)]
    pub bin_block_threshold: u32,

    /// Class count from which root class counts use one shared atomic
    /// histogram instead of per-task private ones. Default: 64.
    #[builder(default = 64)]
    pub shared_histogram_classes: u32,

    // === Resources ===
    /// Memory available for the data and one block of trees. Default: 4 GiB.
    #[builder(default = 4 << 30)]
    pub memory_budget_bytes: u64,

    #[builder(default)]
    pub partition_mode: PartitionMode,

    /// Number of threads. 0 uses the current rayon pool. Default: 0.
    #[builder(default = 0)]
    pub n_threads: usize,

    // === Reproducibility ===
    /// Random seed. Default: 777.
    #[builder(default = 777)]
    pub seed: u64,

    // === Outputs ===
    #[builder(default)]
    pub results: ResultsToCompute,

    // === Logging ===
    #[builder(default)]
    pub verbosity: Verbosity,
}

/// Custom finishing function that validates the config.
impl<S: forest_config_builder::IsComplete> ForestConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any parameter is invalid.
    pub fn build(self) -> Result<ForestConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl ForestConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_trees == 0 {
            return Err(ConfigError::InvalidNTrees);
        }
        if let Task::Classification { n_classes } = self.task {
            if n_classes < 2 {
                return Err(ConfigError::InvalidClassCount(n_classes));
            }
        }

        let fraction = self.observations_per_tree_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::InvalidFraction(fraction));
        }

        let minimums: [(&'static str, u64, u64); 5] = [
            ("min_observations_in_leaf", self.min_observations_in_leaf, 1),
            ("min_observations_in_split", self.min_observations_in_split, 2),
            ("features_per_node", self.features_per_node.map_or(1, u64::from), 1),
            ("memory_budget_bytes", self.memory_budget_bytes, 1),
            ("bin_block_threshold", self.bin_block_threshold as u64, 2),
        ];
        for (field, value, min) in minimums {
            if value < min {
                return Err(ConfigError::TooSmall { field, value, min });
            }
        }

        for (field, value) in [
            ("impurity_threshold", self.impurity_threshold),
            ("min_impurity_decrease", self.min_impurity_decrease),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { field, value });
            }
        }

        Ok(())
    }

    /// Candidate features per node for a table with `n_features` columns.
    pub fn resolved_features_per_node(&self, n_features: usize) -> usize {
        let default = match self.task {
            Task::Classification { .. } => (n_features as f64).sqrt().floor() as usize,
            Task::Regression => n_features / 3,
        };
        self.features_per_node
            .map_or(default, |k| k as usize)
            .max(1)
    }

    /// Whether a tree of this depth is still allowed to split.
    #[inline]
    pub(crate) fn depth_allows_split(&self, level: u32) -> bool {
        self.max_depth == 0 || level < self.max_depth
    }
}

// =============================================================================
// Tests
// =============================================================================
