//! In-process communicator: workers are threads sharing one reduction slot.
//!
//! Contributions are stored per rank and summed in rank order once the last
//! worker arrives, so floating results do not depend on arrival order.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::{CommError, Communicator};

#[derive(Debug, Clone)]
enum Payload {
    F64(Vec<f64>),
    U64(Vec<u64>),
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Payload::F64(v) => v.len(),
            Payload::U64(v) => v.len(),
        }
    }
}

#[derive(Debug)]
struct RoundState {
    /// Contribution of each rank for the current round.
    contributions: Vec<Option<Payload>>,
    arrived: usize,
    /// Completed rounds; waiters block until it changes.
    generation: u64,
    /// Sum of the last completed round.
    result: Result<Payload, CommError>,
}

#[derive(Debug)]
struct Shared {
    n_ranks: usize,
    state: Mutex<RoundState>,
    round_done: Condvar,
}

/// A group of in-process workers.
///
/// ```
/// use binforest::{Communicator, ThreadGroup};
///
/// let comms = ThreadGroup::new(2);
/// std::thread::scope(|s| {
///     for comm in &comms {
///         s.spawn(move || {
///             let mut buf = [comm.rank() as f64 + 1.0];
///             comm.allreduce_sum_f64(&mut buf).unwrap();
///             assert_eq!(buf[0], 3.0);
///         });
///     }
/// });
/// ```
pub struct ThreadGroup;

impl ThreadGroup {
    /// Create one communicator per worker.
    pub fn new(n_ranks: usize) -> Vec<ThreadCommunicator> {
        assert!(n_ranks >= 1, "a thread group needs at least one worker");
        let shared = Arc::new(Shared {
            n_ranks,
            state: Mutex::new(RoundState {
                contributions: vec![None; n_ranks],
                arrived: 0,
                generation: 0,
                result: Ok(Payload::F64(Vec::new())),
            }),
            round_done: Condvar::new(),
        });

        (0..n_ranks)
            .map(|rank| ThreadCommunicator {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// Communicator handle of one in-process worker.
#[derive(Debug, Clone)]
pub struct ThreadCommunicator {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadCommunicator {
    fn lock(&self) -> Result<MutexGuard<'_, RoundState>, CommError> {
        self.shared.state.lock().map_err(|_| CommError::Poisoned)
    }

    fn reduce(&self, payload: Payload) -> Result<Payload, CommError> {
        let mut state = self.lock()?;
        let generation = state.generation;

        state.contributions[self.rank] = Some(payload);
        state.arrived += 1;

        if state.arrived == self.shared.n_ranks {
            let contributions: Vec<Payload> =
                state.contributions.iter_mut().filter_map(Option::take).collect();
            state.result = sum_in_rank_order(contributions);
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.shared.round_done.notify_all();
        } else {
            while state.generation == generation {
                state = self
                    .shared
                    .round_done
                    .wait(state)
                    .map_err(|_| CommError::Poisoned)?;
            }
        }

        state.result.clone()
    }
}

fn sum_in_rank_order(contributions: Vec<Payload>) -> Result<Payload, CommError> {
    let mut iter = contributions.into_iter();
    let Some(mut acc) = iter.next() else {
        return Ok(Payload::F64(Vec::new()));
    };
    let expected = acc.len();

    for (offset, next) in iter.enumerate() {
        let rank = offset + 1;
        if next.len() != expected {
            return Err(CommError::LengthMismatch {
                rank,
                got: next.len(),
                expected,
            });
        }
        match (&mut acc, next) {
            (Payload::F64(a), Payload::F64(b)) => a.iter_mut().zip(b).for_each(|(x, y)| *x += y),
            (Payload::U64(a), Payload::U64(b)) => a.iter_mut().zip(b).for_each(|(x, y)| *x += y),
            _ => return Err(CommError::TypeMismatch { rank }),
        }
    }

    Ok(acc)
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn n_ranks(&self) -> usize {
        self.shared.n_ranks
    }

    fn allreduce_sum_f64(&self, buf: &mut [f64]) -> Result<(), CommError> {
        match self.reduce(Payload::F64(buf.to_vec()))? {
            Payload::F64(sum) if sum.len() == buf.len() => {
                buf.copy_from_slice(&sum);
                Ok(())
            }
            Payload::F64(sum) => Err(CommError::LengthMismatch {
                rank: self.rank,
                got: buf.len(),
                expected: sum.len(),
            }),
            Payload::U64(_) => Err(CommError::TypeMismatch { rank: self.rank }),
        }
    }

    fn allreduce_sum_u64(&self, buf: &mut [u64]) -> Result<(), CommError> {
        match self.reduce(Payload::U64(buf.to_vec()))? {
            Payload::U64(sum) if sum.len() == buf.len() => {
                buf.copy_from_slice(&sum);
                Ok(())
            }
            Payload::U64(sum) => Err(CommError::LengthMismatch {
                rank: self.rank,
                got: buf.len(),
                expected: sum.len(),
            }),
            Payload::F64(_) => Err(CommError::TypeMismatch { rank: self.rank }),
        }
    }
}
