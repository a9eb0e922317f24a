//! Randomized split search (extremely randomized trees).
//!
//! Each candidate feature gets one threshold drawn uniformly between the
//! smallest and largest bin observed in the node. The draw `b` lies in
//! `[min_bin, max_bin)`, so "bin <= b" leaves rows on both sides. The best of
//! the drawn candidates wins under the usual ordering.
//!
//! No histogram is built. A level takes two collectives:
//!
//! 1. the local bin range of every (node, feature) pair, one slot pair per
//!    rank ([`ReductionPoint::SplitRanges`]),
//! 2. the left-child statistics of every drawn threshold
//!    ([`ReductionPoint::SplitThresholds`]).

use super::candidate::{fold_best, Evaluator, SplitCandidate};
use super::{ChosenSplit, LevelSearch, SearchRequest, SplitSearch};
use crate::comm::{ReductionPoint, Reducer};
use crate::data::{BinnedTable, Response};
use crate::error::Result;
use crate::random::StreamKey;
use crate::training::config::{Precision, SplitMethod};
use crate::training::histogram::{accumulate_chunked, stat_stride, REGRESSION_STRIDE};
use crate::utils::split_by_lengths_mut;

/// Range slot value of a feature without local rows.
const NO_ROWS: u64 = 0;

/// One random threshold per candidate feature.
#[derive(Debug, Clone, Copy)]
pub struct RandomSplitter {
    precision: Precision,
}

impl RandomSplitter {
    pub fn new(precision: Precision) -> Self {
        Self { precision }
    }
}

impl SplitSearch for RandomSplitter {
    fn method(&self) -> SplitMethod {
        SplitMethod::Random
    }

    fn search_level(
        &self,
        level: &LevelSearch<'_>,
        reducer: &mut Reducer<'_>,
        requests: &[SearchRequest<'_>],
    ) -> Result<Vec<Option<ChosenSplit>>> {
        let n_candidates: usize = requests.iter().map(|r| r.features.len()).sum();
        if n_candidates == 0 {
            return Ok(vec![None; requests.len()]);
        }
        let table = level.table;
        let parallelism = level.parallelism;

        // local ranges, gathered into this rank's slots
        let local = parallelism.maybe_par_map(requests.iter().collect::<Vec<_>>(), |r| {
            local_bin_ranges(table, r.rows, &r.features)
        });
        let comm = reducer.comm();
        let mut slots = vec![NO_ROWS; 2 * n_candidates * comm.n_ranks()];
        let mine = &mut slots[2 * n_candidates * comm.rank()..2 * n_candidates * (comm.rank() + 1)];
        for (slot, (lo, hi)) in mine.chunks_exact_mut(2).zip(local.into_iter().flatten()) {
            slot[0] = lo;
            slot[1] = hi;
        }
        reducer.sum_u64(ReductionPoint::SplitRanges, &mut slots)?;
        let ranges = global_bin_ranges(&slots, n_candidates);

        // one threshold per feature that spans more than one bin
        let mut thresholds = Vec::with_capacity(n_candidates);
        let mut range = ranges.iter();
        for request in requests {
            for &feature in &request.features {
                let drawn = range.next().copied().flatten().filter(|(lo, hi)| lo < hi).map(|(lo, hi)| {
                    let mut stream = level.rng.stream(StreamKey::RandomSplit {
                        tree: request.key.tree,
                        level: request.key.level,
                        node: request.key.position,
                        feature,
                    });
                    draw_bin(lo, hi, stream.uniform_f64())
                });
                thresholds.push(drawn);
            }
        }

        // left statistics of every threshold, one stride per candidate
        let stride = stat_stride(level.response);
        let lengths: Vec<usize> = requests.iter().map(|r| r.features.len() * stride).collect();
        let mut flat = vec![0.0; n_candidates * stride];
        {
            let mut drawn = thresholds.as_slice();
            let mut work = Vec::with_capacity(requests.len());
            for (out, request) in split_by_lengths_mut(&mut flat, &lengths).into_iter().zip(requests) {
                let (mine, rest) = drawn.split_at(request.features.len());
                drawn = rest;
                work.push((out, request, mine));
            }
            let response = level.response;
            parallelism.maybe_par_for_each(work, |(out, request, drawn)| {
                let shift = request.parent.shift();
                for ((cell, &feature), bin) in out.chunks_exact_mut(stride).zip(&request.features).zip(drawn) {
                    if let Some(bin) = *bin {
                        accumulate_chunked(cell, request.rows, parallelism, |cell, rows| {
                            fill_left(cell, table, rows, feature as usize, bin, response, shift)
                        });
                    }
                }
            });
        }
        reducer.sum_f64(ReductionPoint::SplitThresholds, &mut flat)?;

        let min_leaf = level.config.min_observations_in_leaf;
        let mut offset = 0;
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            let n = request.features.len();
            let cells = &flat[offset * stride..(offset + n) * stride];
            let drawn = &thresholds[offset..offset + n];
            offset += n;

            let eval = Evaluator::new(request.parent, min_leaf, self.precision);
            let candidates = request
                .features
                .iter()
                .zip(drawn)
                .zip(cells.chunks_exact(stride))
                .map(|((&feature, bin), cell)| bin.and_then(|bin| eval.evaluate(feature, bin, cell)));
            let best: Option<SplitCandidate> = fold_best(candidates, eval.tolerance());

            out.push(best.map(|candidate| {
                let i = request.features.iter().position(|&f| f == candidate.feature).unwrap_or(0);
                ChosenSplit {
                    left_stats: cells[i * stride..(i + 1) * stride].to_vec(),
                    candidate,
                }
            }));
        }
        Ok(out)
    }
}

/// Local `(min_bin + 1, max_bin + 1)` of each feature over `rows`, or
/// `(NO_ROWS, NO_ROWS)` if `rows` is empty.
fn local_bin_ranges(table: &BinnedTable, rows: &[u32], features: &[u32]) -> Vec<(u64, u64)> {
    features
        .iter()
        .map(|&f| {
            let bins = rows.iter().map(|&r| table.bin(r as usize, f as usize));
            match bins.clone().min().zip(bins.max()) {
                Some((lo, hi)) => (u64::from(lo) + 1, u64::from(hi) + 1),
                None => (NO_ROWS, NO_ROWS),
            }
        })
        .collect()
}

/// Combine the rank slots of [`ReductionPoint::SplitRanges`] into the global
/// observed bin range of each candidate; `None` if no worker holds a row.
pub fn global_bin_ranges(slots: &[u64], n_candidates: usize) -> Vec<Option<(u32, u32)>> {
    let mut ranges: Vec<Option<(u32, u32)>> = vec![None; n_candidates];
    if n_candidates == 0 {
        return ranges;
    }
    for rank in slots.chunks_exact(2 * n_candidates) {
        for (range, slot) in ranges.iter_mut().zip(rank.chunks_exact(2)) {
            if slot[0] == NO_ROWS {
                continue;
            }
            let (lo, hi) = ((slot[0] - 1) as u32, (slot[1] - 1) as u32);
            *range = Some(match *range {
                Some((a, b)) => (a.min(lo), b.max(hi)),
                None => (lo, hi),
            });
        }
    }
    ranges
}

/// Statistics of the rows with `bin(feature) <= bin`, in histogram cell form.
fn fill_left(out: &mut [f64], table: &BinnedTable, rows: &[u32], feature: usize, bin: u32, response: &Response, shift: f64) {
    let left = rows.iter().map(|&r| r as usize).filter(|&r| table.bin(r, feature) <= bin);
    match response {
        Response::Classes { labels, .. } => {
            for r in left {
                out[labels[r] as usize] += 1.0;
            }
        }
        Response::Values(values) => {
            debug_assert_eq!(out.len(), REGRESSION_STRIDE);
            for r in left {
                let d = values[r] - shift;
                out[0] += 1.0;
                out[1] += d;
                out[2] += d * d;
            }
        }
    }
}

/// Map `u` in `[0, 1)` to a bin in `[lo, hi)`.
#[inline]
pub fn draw_bin(lo: u32, hi: u32, u: f64) -> u32 {
    debug_assert!(lo < hi);
    let span = hi - lo;
    lo + ((u * span as f64) as u32).min(span - 1)
}
