//! Training progress logging.
//!
//! [`TrainingLogger`] filters messages by [`Verbosity`] and emits them as
//! `tracing` events, so the caller decides where they go by installing a
//! subscriber.

use std::time::Instant;

/// How much training progress to report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    #[default]
    Silent,
    Warning,
    Info,
    Debug,
}

/// Verbosity-gated progress reporter of one training run.
#[derive(Debug)]
pub struct TrainingLogger {
    verbosity: Verbosity,
    rank: usize,
    started: Instant,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity, rank: usize) -> Self {
        Self {
            verbosity,
            rank,
            started: Instant::now(),
        }
    }

    #[inline]
    pub fn enabled(&self, level: Verbosity) -> bool {
        level != Verbosity::Silent && self.verbosity >= level
    }

    pub fn start_training(&self, n_trees: u32, trees_per_block: usize, n_rows: usize) {
        if self.enabled(Verbosity::Info) {
            tracing::info!(rank = self.rank, n_trees, trees_per_block, n_rows, "training started");
        }
    }

    pub fn start_block(&self, block: usize, first_tree: u64, n_trees: usize) {
        if self.enabled(Verbosity::Info) {
            tracing::info!(rank = self.rank, block, first_tree, n_trees, "tree block started");
        }
    }

    pub fn log_level(&self, level: u32, active_nodes: usize, split_nodes: usize) {
        if self.enabled(Verbosity::Debug) {
            tracing::debug!(rank = self.rank, level, active_nodes, split_nodes, "level done");
        }
    }

    pub fn finish_block(&self, block: usize, n_nodes: usize) {
        if self.enabled(Verbosity::Info) {
            tracing::info!(rank = self.rank, block, n_nodes, "tree block finished");
        }
    }

    pub fn warn(&self, message: &str) {
        if self.enabled(Verbosity::Warning) {
            tracing::warn!(rank = self.rank, "{message}");
        }
    }

    pub fn finish_training(&self, oob_error: Option<f64>) {
        if self.enabled(Verbosity::Info) {
            let elapsed_ms = self.started.elapsed().as_millis() as u64;
            match oob_error {
                Some(oob_error) => {
                    tracing::info!(rank = self.rank, elapsed_ms, oob_error, "training finished")
                }
                None => tracing::info!(rank = self.rank, elapsed_ms, "training finished"),
            }
        }
    }
}
