//! Distributed communication.
//!
//! Training only needs a sum-allreduce and rank queries. Every collective the
//! trainer issues goes through a [`Reducer`], which names it with a
//! [`ReductionPoint`]; the ordered list of points is the whole distributed
//! protocol and can be inspected in tests.
//!
//! - [`SingleWorker`] - No-op communicator for single-node training
//! - [`ThreadGroup`] - In-process workers on threads, used to simulate
//!   distributed training

mod reduction;
mod threads;

pub use reduction::{ReductionPoint, Reducer};
pub use threads::{ThreadCommunicator, ThreadGroup};

/// Errors raised by collective operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommError {
    #[error("allreduce buffer length mismatch: rank {rank} sent {got}, expected {expected}")]
    LengthMismatch {
        rank: usize,
        got: usize,
        expected: usize,
    },

    #[error("allreduce element type mismatch on rank {rank}")]
    TypeMismatch { rank: usize },

    #[error("a worker panicked while holding the communicator state")]
    Poisoned,
}

/// Collective operations used by distributed training.
///
/// All workers must issue the same sequence of collectives with buffers of
/// equal length. Each call blocks until every worker has contributed.
pub trait Communicator: Sync {
    /// Rank of this worker in `[0, n_ranks)`.
    fn rank(&self) -> usize;

    /// Number of workers.
    fn n_ranks(&self) -> usize;

    /// Element-wise sum over all workers, result written back to `buf`.
    fn allreduce_sum_f64(&self, buf: &mut [f64]) -> Result<(), CommError>;

    /// Element-wise sum over all workers, result written back to `buf`.
    fn allreduce_sum_u64(&self, buf: &mut [u64]) -> Result<(), CommError>;

    /// Returns `true` if more than one worker participates.
    fn is_distributed(&self) -> bool {
        self.n_ranks() > 1
    }
}

/// Communicator for single-node training: every collective is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleWorker;

impl Communicator for SingleWorker {
    fn rank(&self) -> usize {
        0
    }

    fn n_ranks(&self) -> usize {
        1
    }

    fn allreduce_sum_f64(&self, _buf: &mut [f64]) -> Result<(), CommError> {
        Ok(())
    }

    fn allreduce_sum_u64(&self, _buf: &mut [u64]) -> Result<(), CommError> {
        Ok(())
    }
}
