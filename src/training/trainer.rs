//! Forest trainer: grows tree blocks level by level.
//!
//! Per block of trees the trainer runs
//!
//! 1. **Sample**: every tree draws its rows from a stream keyed by its
//!    global index, recording the out-of-bag rows.
//! 2. **Root statistics**: class counts or moments of every root, allreduced.
//! 3. **Levels**: nodes that may still split search their best split over
//!    global histograms, split nodes are partitioned into two children.
//!    The loop ends when a level produces no children.
//! 4. **Finalize**: the level records go to the [`ModelManager`], then every
//!    tree of the block is evaluated on its out-of-bag rows.
//!
//! Block size only changes how many trees share a pass: every random draw is
//! keyed by global tree index, so the forest is the same for any block size.
//!
//! # Example
//!
//! ```
//! use binforest::testing::random_binned_table;
//! use binforest::{Forest, ForestConfig, ForestTrainer, ModelManager, Task};
//!
//! let table = random_binned_table(64, 3, 8, 1);
//! let labels: Vec<f64> = (0..64).map(|r| (table.bin(r, 0) >= 4) as u8 as f64).collect();
//!
//! let config = ForestConfig::builder()
//!     .task(Task::Classification { n_classes: 2 })
//!     .n_trees(4)
//!     .n_threads(1)
//!     .build()
//!     .unwrap();
//! let mut forest = Forest::new(config.task, table.n_features());
//! let result = ForestTrainer::new(config).train(&table, &labels, &mut forest).unwrap();
//! assert_eq!(result.n_trees, 4);
//! assert_eq!(forest.n_trees(), 4);
//! ```

use std::ops::Range;

use crate::comm::{Communicator, ReductionPoint, Reducer, SingleWorker};
use crate::data::{BinnedTable, Response, WorkerRows};
use crate::error::{Result, TrainError};
use crate::model::{LevelRecord, ModelManager, LEAF_MARK};
use crate::random::RandomEngine;
use crate::utils::{run_with_threads, Parallelism};

use super::block::{plan_blocks, BlockPlan, TreeFootprint};
use super::config::{ForestConfig, Task};
use super::histogram::{root_statistics, stat_stride};
use super::impurity::ImpurityStore;
use super::logger::TrainingLogger;
use super::node::NodeList;
use super::partition::RowOrder;
use super::postprocess::PostProcessor;
use super::sampling::{sample_features, RowSampler, TreeSample};
use super::split::{ChosenSplit, LevelSearch, NodeKey, ParentStats, SearchRequest, SplitSearch, SplitterFactory};
use super::splitting::split_level;

// =============================================================================
// TrainingResult
// =============================================================================

/// Outputs of a training call besides the trees themselves.
///
/// Every optional field is `Some` only if requested in
/// [`ResultsToCompute`](super::ResultsToCompute).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingResult {
    /// Trees handed to the model manager.
    pub n_trees: usize,
    pub trees_per_block: usize,
    /// Misclassification rate or mean squared error over rows with at least
    /// one out-of-bag prediction.
    pub oob_error: Option<f64>,
    pub oob_accuracy: Option<f64>,
    pub oob_r2: Option<f64>,
    /// Per local row; [`UNVISITED_ROW`](super::postprocess::UNVISITED_ROW)
    /// for rows that were never out of bag.
    pub oob_error_per_row: Option<Vec<f64>>,
    pub variable_importance: Option<Vec<f64>>,
    /// Collectives issued, in order, with their buffer lengths.
    pub reductions: Vec<(ReductionPoint, usize)>,
}

// =============================================================================
// ForestTrainer
// =============================================================================

/// Trains decision forests over binned tables.
#[derive(Debug, Clone)]
pub struct ForestTrainer {
    config: ForestConfig,
}

impl ForestTrainer {
    pub fn new(config: ForestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Train on a whole table with one worker.
    ///
    /// `labels` holds class ids (as `f64`) or regression targets, one per row.
    pub fn train<M>(&self, table: &BinnedTable, labels: &[f64], model: &mut M) -> Result<TrainingResult>
    where
        M: ModelManager + Send,
    {
        self.train_distributed(table, labels, WorkerRows::single(table.n_rows()), &SingleWorker, model)
    }

    /// Train as one of several workers.
    ///
    /// `table` and `labels` hold the rows `worker` owns. Every worker must
    /// call this with the same configuration; all of them end up with the
    /// same forest.
    ///
    /// # Errors
    ///
    /// Input validation, memory budget and collective failures; see
    /// [`TrainError`].
    pub fn train_distributed<M>(
        &self,
        table: &BinnedTable,
        labels: &[f64],
        worker: WorkerRows,
        comm: &dyn Communicator,
        model: &mut M,
    ) -> Result<TrainingResult>
    where
        M: ModelManager + Send,
    {
        let config = &self.config;
        config.validate()?;
        validate_inputs(table, labels, worker, config.task)?;

        let response = match config.task {
            Task::Classification { n_classes } => Response::classification(labels, n_classes)?,
            Task::Regression => Response::regression(labels)?,
        };

        run_with_threads(config.n_threads, |parallelism| -> Result<TrainingResult> {
            let mut reducer = Reducer::new(comm);
            let logger = TrainingLogger::new(config.verbosity, comm.rank());
            let run = TrainingRun::new(config, table, &response, worker, parallelism, &logger);

            let plan = run.plan(&mut reducer)?;
            logger.start_training(config.n_trees, plan.trees_per_block, worker.global_rows);

            let mut post = PostProcessor::new(config.task, config.results, table.n_rows(), table.n_features());
            let model_offset = model.n_trees();
            for (block, trees) in plan.blocks(config.n_trees as usize).enumerate() {
                logger.start_block(block, trees.start as u64, trees.len());
                let grown = run.grow_block(&mut reducer, trees.clone())?;
                let n_nodes: usize = grown.levels.iter().map(|l| l.nodes.len()).sum();

                model.add_tree_block(&grown.levels, table.borders(), trees.len())?;
                post.record_levels(&grown.levels, trees.len());
                if post.needs_oob() {
                    for (t, sample) in trees.clone().zip(&grown.samples) {
                        post.process_tree(
                            &mut reducer,
                            &*model,
                            model_offset + t,
                            &sample.oob,
                            table,
                            &response,
                            &run.engine,
                            parallelism,
                        )?;
                    }
                }
                logger.finish_block(block, n_nodes);
            }

            let summary = post.finish(&mut reducer, &response)?;
            logger.finish_training(summary.oob_error);

            Ok(TrainingResult {
                n_trees: config.n_trees as usize,
                trees_per_block: plan.trees_per_block,
                oob_error: summary.oob_error,
                oob_accuracy: summary.oob_accuracy,
                oob_r2: summary.oob_r2,
                oob_error_per_row: summary.oob_error_per_row,
                variable_importance: summary.variable_importance,
                reductions: reducer.trace().to_vec(),
            })
        })?
    }
}

/// Check sizes against the addressable ranges before any work starts.
fn validate_inputs(table: &BinnedTable, labels: &[f64], worker: WorkerRows, task: Task) -> Result<()> {
    if labels.len() != table.n_rows() {
        return Err(TrainError::ShapeMismatch {
            what: "labels",
            got: labels.len(),
            expected: table.n_rows(),
        });
    }
    if worker.len != table.n_rows() {
        return Err(TrainError::ShapeMismatch {
            what: "worker rows",
            got: table.n_rows(),
            expected: worker.len,
        });
    }

    let limits: [(&'static str, u64, u64, u64); 3] = [
        ("global_rows", worker.global_rows as u64, 1, u32::MAX as u64),
        ("n_features", table.n_features() as u64, 1, LEAF_MARK as u64 - 1),
        ("max_bins", table.max_bins() as u64, 1, LEAF_MARK as u64 - 1),
    ];
    for (what, value, min, max) in limits {
        if value < min {
            return Err(TrainError::InputDomain { what, value, limit: min });
        }
        if value > max {
            return Err(TrainError::InputDomain { what, value, limit: max });
        }
    }
    if worker.end() > worker.global_rows {
        return Err(TrainError::InputDomain {
            what: "worker row end",
            value: worker.end() as u64,
            limit: worker.global_rows as u64,
        });
    }
    // class histograms of one feature are addressed with 32-bit indices
    if let Task::Classification { n_classes } = task {
        let limit = u32::MAX as u64 / table.max_bins() as u64;
        if n_classes as u64 > limit {
            return Err(TrainError::InputDomain {
                what: "n_classes",
                value: n_classes as u64,
                limit,
            });
        }
    }
    Ok(())
}

// =============================================================================
// TrainingRun
// =============================================================================

/// Read-only state shared by every block of one training call.
struct TrainingRun<'a> {
    config: &'a ForestConfig,
    table: &'a BinnedTable,
    response: &'a Response,
    engine: RandomEngine,
    sampler: RowSampler,
    splitter: Box<dyn SplitSearch>,
    features_per_node: usize,
    parallelism: Parallelism,
    logger: &'a TrainingLogger,
}

/// Output of one grown block.
struct GrownBlock {
    levels: Vec<LevelRecord>,
    /// Samples of the block's trees, in tree order.
    samples: Vec<TreeSample>,
}

impl<'a> TrainingRun<'a> {
    fn new(
        config: &'a ForestConfig,
        table: &'a BinnedTable,
        response: &'a Response,
        worker: WorkerRows,
        parallelism: Parallelism,
        logger: &'a TrainingLogger,
    ) -> Self {
        let n_features = table.n_features();
        if config.features_per_node.is_some_and(|k| k as usize > n_features) {
            logger.warn("features_per_node exceeds the feature count; every node uses all features");
        }
        Self {
            config,
            table,
            response,
            engine: RandomEngine::new(config.seed),
            sampler: RowSampler::new(worker, config.observations_per_tree_fraction, config.bootstrap),
            splitter: SplitterFactory::create(config.split_method, config.precision),
            features_per_node: config.resolved_features_per_node(n_features).min(n_features),
            parallelism,
            logger,
        }
    }

    /// Trees per block, agreed by all workers.
    ///
    /// Each worker reports what fits its own budget; the smallest wins. A
    /// worker that cannot fit one tree reports 0 and every worker fails.
    fn plan(&self, reducer: &mut Reducer<'_>) -> Result<BlockPlan> {
        let config = self.config;
        let footprint = TreeFootprint {
            rows: self.sampler.n_select().min(self.table.n_rows().max(1)),
            max_depth: config.max_depth,
            min_observations_in_split: config.min_observations_in_split,
            features_per_node: self.features_per_node,
            max_bins: self.table.max_bins() as usize,
            stride: stat_stride(self.response),
            n_classes: config.task.n_classes() as usize,
        };
        let data_bytes = self.table.footprint_bytes() + self.response.footprint_bytes();
        let n_trees = config.n_trees as usize;
        let local = plan_blocks(config.memory_budget_bytes, data_bytes, footprint.bytes(), n_trees);

        let comm = reducer.comm();
        let mut slots = vec![0u64; comm.n_ranks()];
        slots[comm.rank()] = local.as_ref().map_or(0, |p| p.trees_per_block as u64);
        reducer.sum_u64(ReductionPoint::BlockPlan, &mut slots)?;

        let local = local?;
        let agreed = slots.iter().copied().min().unwrap_or(0) as usize;
        if agreed == 0 {
            self.logger.warn("another worker cannot fit a single tree in its memory budget");
            return Err(TrainError::ResourceExhausted {
                required: data_bytes + footprint.bytes(),
                available: config.memory_budget_bytes,
            });
        }
        if agreed < local.trees_per_block {
            self.logger.warn("tree block size reduced to match the other workers");
        }
        Ok(BlockPlan {
            trees_per_block: agreed,
            n_blocks: n_trees.div_ceil(agreed),
        })
    }

    /// Grow the trees `trees` (global indices) level by level.
    fn grow_block(&self, reducer: &mut Reducer<'_>, trees: Range<usize>) -> Result<GrownBlock> {
        let config = self.config;
        let first_tree = trees.start;
        let with_oob = config.results.needs_oob();

        let samples: Vec<TreeSample> = self
            .parallelism
            .maybe_par_map(trees, |t| self.sampler.sample(&self.engine, t as u64, with_oob));
        let (mut order, ranges) = RowOrder::from_samples(samples.iter().map(|s| s.rows.as_slice()));

        let mut stats = {
            let roots: Vec<&[u32]> = ranges.iter().map(|r| order.rows(r.clone())).collect();
            root_statistics(
                reducer,
                self.response,
                &roots,
                config.shared_histogram_classes,
                self.parallelism,
            )?
        };
        let mut nodes = NodeList::with_capacity(ranges.len());
        for (t, range) in ranges.iter().enumerate() {
            nodes.push(t as u32, 0, range.start, range.len(), stats.row_count(t), stats.winning_class(t));
        }

        let mut levels = Vec::new();
        let mut level = 0u32;
        while !nodes.is_empty() {
            let choices = self.search_level(reducer, &nodes, &stats, &order, first_tree, level)?;
            let split = split_level(
                level,
                &mut nodes,
                &stats,
                &choices,
                &mut order,
                self.table,
                config,
                self.parallelism,
            );
            self.logger.log_level(level, nodes.len(), split.record.n_splits());

            levels.push(split.record);
            nodes = split.children;
            stats = split.child_stats;
            level += 1;
        }

        Ok(GrownBlock { levels, samples })
    }

    /// Split choices of every node of a level; `None` for leaves.
    fn search_level(
        &self,
        reducer: &mut Reducer<'_>,
        nodes: &NodeList,
        stats: &ImpurityStore,
        order: &RowOrder,
        first_tree: usize,
        level: u32,
    ) -> Result<Vec<Option<ChosenSplit>>> {
        let n_features = self.table.n_features();
        let eligible: Vec<usize> = (0..nodes.len())
            .filter(|&i| self.may_split(stats, i, level))
            .collect();

        let requests: Vec<SearchRequest<'_>> = eligible
            .iter()
            .map(|&i| {
                let key = NodeKey {
                    tree: (first_tree + nodes.tree(i) as usize) as u64,
                    level,
                    position: nodes.tree_position(i),
                };
                SearchRequest {
                    rows: order.rows(nodes.row_range(i)),
                    features: sample_features(&self.engine, key, n_features, self.features_per_node),
                    parent: ParentStats::from_store(stats, i),
                    key,
                }
            })
            .collect();

        let search = LevelSearch::new(
            self.table,
            self.response,
            self.config,
            self.splitter.as_ref(),
            &self.engine,
            self.parallelism,
        );
        let found = search.run(reducer, &requests)?;

        let mut choices = vec![None; nodes.len()];
        for (i, choice) in eligible.into_iter().zip(found) {
            choices[i] = choice;
        }
        Ok(choices)
    }

    /// Whether node `i` is searched at all. Depends on global statistics
    /// only, so every worker agrees.
    fn may_split(&self, stats: &ImpurityStore, i: usize, level: u32) -> bool {
        let config = self.config;
        let rows = stats.row_count(i);
        let impurity = stats.impurity(i);
        config.depth_allows_split(level)
            && rows >= config.min_observations_in_split
            && rows >= config.min_observations_in_leaf.saturating_mul(2)
            && impurity > 0.0
            && impurity >= config.impurity_threshold
    }
}
