//! Versioned JSON persistence for forests.
//!
//! Schema types are separate from runtime types so the on-disk format can
//! evolve independently and is validated on load. Conversions are `From`
//! (runtime to schema, lossless) and `TryFrom` (schema to runtime, checked).
//!
//! ```
//! use binforest::model::persist::{forest_from_json, forest_to_json};
//! use binforest::model::Forest;
//! use binforest::Task;
//!
//! let forest = Forest::new(Task::Regression, 3);
//! let json = forest_to_json(&forest).unwrap();
//! assert_eq!(forest_from_json(&json).unwrap(), forest);
//! ```

use serde::{Deserialize, Serialize};

use super::tree::TreeParts;
use super::Forest;
use crate::training::Task;

/// Current schema version.
pub const FORMAT_VERSION: u32 = 1;

/// Errors raised while reading or writing a persisted forest.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported format version {found} (this build reads version {FORMAT_VERSION})")]
    UnsupportedVersion { found: u32 },

    #[error("tree {tree}: {reason}")]
    InvalidTree { tree: usize, reason: String },

    #[error("classification forest needs at least 2 classes, got {0}")]
    InvalidClassCount(u32),
}

// =============================================================================
// Schema types
// =============================================================================

/// Task of a persisted forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskSchema {
    Classification { n_classes: u32 },
    Regression,
}

/// One tree as flat node arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSchema {
    /// Split feature per node; `u32::MAX` marks a leaf.
    pub split_features: Vec<u32>,
    pub split_bins: Vec<u32>,
    pub thresholds: Vec<f64>,
    pub children_left: Vec<u32>,
    pub children_right: Vec<u32>,
    /// Majority class or mean per node.
    pub responses: Vec<f64>,
    /// Row-major `n_nodes x n_classes` class frequencies (classification only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub class_probabilities: Vec<f64>,
    pub impurities: Vec<f64>,
    pub row_counts: Vec<u64>,
    pub impurity_decreases: Vec<f64>,
}

/// A persisted forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestSchema {
    pub format_version: u32,
    pub task: TaskSchema,
    pub n_features: usize,
    pub trees: Vec<TreeSchema>,
}

// =============================================================================
// Conversions
// =============================================================================

impl From<Task> for TaskSchema {
    fn from(task: Task) -> Self {
        match task {
            Task::Classification { n_classes } => Self::Classification { n_classes },
            Task::Regression => Self::Regression,
        }
    }
}

impl TryFrom<TaskSchema> for Task {
    type Error = PersistError;

    fn try_from(schema: TaskSchema) -> Result<Self, Self::Error> {
        match schema {
            TaskSchema::Classification { n_classes } if n_classes < 2 => {
                Err(PersistError::InvalidClassCount(n_classes))
            }
            TaskSchema::Classification { n_classes } => Ok(Task::Classification { n_classes }),
            TaskSchema::Regression => Ok(Task::Regression),
        }
    }
}

impl From<&Forest> for ForestSchema {
    fn from(forest: &Forest) -> Self {
        let trees = forest
            .trees()
            .iter()
            .map(|tree| {
                let parts = TreeParts::from(tree);
                TreeSchema {
                    split_features: parts.split_features,
                    split_bins: parts.split_bins,
                    thresholds: parts.thresholds,
                    children_left: parts.left_children,
                    children_right: parts.right_children,
                    responses: parts.responses,
                    class_probabilities: parts.probabilities,
                    impurities: parts.impurities,
                    row_counts: parts.row_counts,
                    impurity_decreases: parts.impurity_decreases,
                }
            })
            .collect();

        Self {
            format_version: FORMAT_VERSION,
            task: forest.task().into(),
            n_features: forest.n_features(),
            trees,
        }
    }
}

impl TryFrom<ForestSchema> for Forest {
    type Error = PersistError;

    fn try_from(schema: ForestSchema) -> Result<Self, Self::Error> {
        if schema.format_version != FORMAT_VERSION {
            return Err(PersistError::UnsupportedVersion {
                found: schema.format_version,
            });
        }
        let task = Task::try_from(schema.task)?;
        let n_features = schema.n_features;

        let trees = schema
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                let invalid = |reason: String| PersistError::InvalidTree { tree: i, reason };
                if let Some(&f) = t
                    .split_features
                    .iter()
                    .find(|&&f| f != super::LEAF_MARK && f as usize >= n_features)
                {
                    return Err(invalid(format!("split feature {f} >= n_features {n_features}")));
                }
                TreeParts {
                    split_features: t.split_features,
                    split_bins: t.split_bins,
                    thresholds: t.thresholds,
                    left_children: t.children_left,
                    right_children: t.children_right,
                    responses: t.responses,
                    probabilities: t.class_probabilities,
                    impurities: t.impurities,
                    row_counts: t.row_counts,
                    impurity_decreases: t.impurity_decreases,
                    n_classes: task.n_classes(),
                }
                .into_tree()
                .map_err(invalid)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Forest::from_trees(task, n_features, trees))
    }
}

// =============================================================================
// JSON entry points
// =============================================================================

/// Serialize a forest to pretty-printed JSON.
pub fn forest_to_json(forest: &Forest) -> Result<String, PersistError> {
    Ok(serde_json::to_string_pretty(&ForestSchema::from(forest))?)
}

/// Parse and validate a forest from JSON.
pub fn forest_from_json(json: &str) -> Result<Forest, PersistError> {
    let schema: ForestSchema = serde_json::from_str(json)?;
    Forest::try_from(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LevelRecord, ModelManager, NodeRecord, LEAF_MARK};

    fn trained_forest() -> Forest {
        let leaf = |response: f64, counts: Vec<u64>| NodeRecord {
            tree: 0,
            split_feature: LEAF_MARK,
            split_bin: LEAF_MARK,
            response,
            row_count: counts.iter().sum(),
            class_counts: counts,
            impurity: 0.0,
            impurity_decrease: 0.0,
        };
        let levels = vec![
            LevelRecord {
                nodes: vec![NodeRecord {
                    tree: 0,
                    split_feature: 1,
                    split_bin: 2,
                    response: 1.0,
                    class_counts: vec![1, 3],
                    impurity: 0.375,
                    row_count: 4,
                    impurity_decrease: 0.375,
                }],
            },
            LevelRecord {
                nodes: vec![leaf(0.0, vec![1, 0]), leaf(1.0, vec![0, 3])],
            },
        ];
        let mut forest = Forest::new(Task::Classification { n_classes: 2 }, 2);
        let borders = vec![vec![0.5; 4], vec![0.5, 1.5, 2.5, 3.5]];
        forest.add_tree_block(&levels, &borders, 1).unwrap();
        forest
    }

    #[test]
    fn test_json_preserves_forest() {
        let forest = trained_forest();
        let json = forest_to_json(&forest).unwrap();
        assert!(json.contains("\"format_version\": 1"));
        let loaded = forest_from_json(&json).unwrap();
        assert_eq!(loaded, forest);
        assert_eq!(loaded.tree(0).threshold(0), 2.5);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut schema = ForestSchema::from(&trained_forest());
        schema.format_version = 99;
        assert!(matches!(
            Forest::try_from(schema),
            Err(PersistError::UnsupportedVersion { found: 99 })
        ));
    }

    #[test]
    fn test_rejects_out_of_range_feature() {
        let mut schema = ForestSchema::from(&trained_forest());
        schema.n_features = 1;
        assert!(matches!(
            Forest::try_from(schema),
            Err(PersistError::InvalidTree { tree: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_arrays() {
        let mut schema = ForestSchema::from(&trained_forest());
        schema.trees[0].responses.pop();
        assert!(Forest::try_from(schema).is_err());
    }

    #[test]
    fn test_task_schema_tagging() {
        let json = serde_json::to_string(&TaskSchema::from(Task::Regression)).unwrap();
        assert_eq!(json, r#"{"type":"regression"}"#);
        assert!(Task::try_from(TaskSchema::Classification { n_classes: 1 }).is_err());
    }
}
