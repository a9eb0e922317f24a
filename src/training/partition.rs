//! Row-order buffers and node partitioning.
//!
//! Every node of a level owns a contiguous range of the row order. When a
//! node splits, its range is partitioned into a "goes left" prefix and a
//! "goes right" suffix: a row goes left iff its bin for the split feature is
//! `<= split_bin`. Partitioning reads the front buffer and writes the back
//! buffer, then the buffers swap roles.
//!
//! ```text
//! front: [  node 0 rows  |  node 1 rows  | leaf rows | node 2 rows ]
//!                 │               │                          │
//! back:  [ L0  |   R0    | L1 | R1      | leaf rows | L2 | R2      ]
//! ```
//!
//! Large ranges are cut into sub-blocks of [`BLOCK_ROWS`]. Each sub-block
//! counts its left rows, reserves an output region of the left part and of
//! the right part, then writes its rows in order. Reservation is either an
//! exclusive prefix sum over the block counts ([`PartitionMode::PrefixScan`],
//! stable) or an atomic fetch-add on a left and a right cursor
//! ([`PartitionMode::AtomicCursor`], correct as a set partition but the
//! order of blocks depends on scheduling).

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::data::BinnedTable;
use crate::utils::{exclusive_scan, split_by_lengths_mut, Parallelism};

/// Rows per partition sub-block.
pub const BLOCK_ROWS: usize = 4096;

/// Ranges shorter than this are partitioned by a single sequential pass.
const PARALLEL_MIN_ROWS: usize = 4 * BLOCK_ROWS;

/// How sub-blocks of a large range reserve their output regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartitionMode {
    /// Exclusive prefix sum over block counts; stable.
    #[default]
    PrefixScan,
    /// Atomic left/right cursors; block order is scheduling-dependent.
    ///
    /// Splits are identical for classification, where histograms hold exact
    /// counts. Regression histogram sums then depend on row order, so
    /// forests are only bit-reproducible under [`PartitionMode::PrefixScan`].
    AtomicCursor,
}

/// Split of one node's row range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTask {
    pub range: Range<usize>,
    pub feature: u32,
    pub bin: u32,
}

// ============================================================================
// RowOrder
// ============================================================================

/// Double-buffered row order of a tree block.
#[derive(Debug, Clone, Default)]
pub struct RowOrder {
    front: Vec<u32>,
    back: Vec<u32>,
}

impl RowOrder {
    pub fn new(rows: Vec<u32>) -> Self {
        let back = vec![0; rows.len()];
        Self { front: rows, back }
    }

    /// Concatenate per-tree samples; returns the order and each tree's range.
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a [u32]>) -> (Self, Vec<Range<usize>>) {
        let mut rows = Vec::new();
        let mut ranges = Vec::new();
        for sample in samples {
            let start = rows.len();
            rows.extend_from_slice(sample);
            ranges.push(start..rows.len());
        }
        (Self::new(rows), ranges)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.front.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.front.is_empty()
    }

    /// Current rows of a range.
    #[inline]
    pub fn rows(&self, range: Range<usize>) -> &[u32] {
        &self.front[range]
    }

    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.front
    }

    /// Rows of `range` that would go left, without moving them.
    pub fn count_left(&self, table: &BinnedTable, range: Range<usize>, feature: u32, bin: u32) -> usize {
        count_left(&self.front[range], table, feature as usize, bin)
    }

    /// Partition every task's range and swap buffers.
    ///
    /// `tasks` must be sorted by range start and non-overlapping. Rows
    /// outside every task keep their positions. Returns the left row count
    /// of each task.
    pub fn partition(
        &mut self,
        table: &BinnedTable,
        tasks: &[PartitionTask],
        mode: PartitionMode,
        parallelism: Parallelism,
    ) -> Vec<usize> {
        debug_assert!(tasks.windows(2).all(|w| w[0].range.end <= w[1].range.start));

        let total = self.front.len();
        let mut lengths = Vec::with_capacity(2 * tasks.len() + 1);
        let mut cursor = 0;
        for task in tasks {
            lengths.push(task.range.start - cursor);
            lengths.push(task.range.len());
            cursor = task.range.end;
        }
        lengths.push(total - cursor);

        let front = &self.front;
        let pieces = split_by_lengths_mut(&mut self.back, &lengths);
        let mut work = Vec::with_capacity(tasks.len());
        let mut offset = 0;
        for (i, dst) in pieces.into_iter().enumerate() {
            let src = &front[offset..offset + dst.len()];
            offset += dst.len();
            if i % 2 == 1 {
                work.push((src, dst, &tasks[i / 2]));
            } else {
                dst.copy_from_slice(src);
            }
        }

        let left_counts = parallelism.maybe_par_map(work, |(src, dst, task)| {
            partition_range(src, dst, table, task.feature as usize, task.bin, mode, parallelism)
        });

        std::mem::swap(&mut self.front, &mut self.back);
        left_counts
    }
}

// ============================================================================
// Range partitioning
// ============================================================================

#[inline]
fn count_left(rows: &[u32], table: &BinnedTable, feature: usize, bin: u32) -> usize {
    rows.iter()
        .filter(|&&r| table.bin(r as usize, feature) <= bin)
        .count()
}

/// Stable sequential partition of `src` into `dst = [left | right]`.
fn partition_sequential(src: &[u32], dst: &mut [u32], table: &BinnedTable, feature: usize, bin: u32, n_left: usize) {
    let (left, right) = dst.split_at_mut(n_left);
    let (mut l, mut r) = (0, 0);
    for &row in src {
        if table.bin(row as usize, feature) <= bin {
            left[l] = row;
            l += 1;
        } else {
            right[r] = row;
            r += 1;
        }
    }
    debug_assert_eq!(l, left.len());
    debug_assert_eq!(r, right.len());
}

/// Partition one range; returns its left row count.
fn partition_range(
    src: &[u32],
    dst: &mut [u32],
    table: &BinnedTable,
    feature: usize,
    bin: u32,
    mode: PartitionMode,
    parallelism: Parallelism,
) -> usize {
    if !parallelism.is_parallel() || src.len() < PARALLEL_MIN_ROWS {
        let n_left = count_left(src, table, feature, bin);
        partition_sequential(src, dst, table, feature, bin, n_left);
        return n_left;
    }

    let blocks: Vec<&[u32]> = src.chunks(BLOCK_ROWS).collect();
    let block_left = parallelism.maybe_par_map(blocks.clone(), |block| count_left(block, table, feature, bin));
    let out = SharedSlice::new(dst);

    match mode {
        PartitionMode::PrefixScan => {
            let mut left_start = block_left.clone();
            let n_left = exclusive_scan(&mut left_start);
            let mut right_start: Vec<usize> = blocks.iter().zip(&block_left).map(|(b, &l)| b.len() - l).collect();
            exclusive_scan(&mut right_start);

            let work: Vec<_> = blocks
                .into_iter()
                .zip(left_start.into_iter().zip(right_start))
                .collect();
            parallelism.maybe_par_for_each(work, |(block, (li, ri))| {
                write_block(&out, block, table, feature, bin, li, n_left + ri);
            });
            n_left
        }
        PartitionMode::AtomicCursor => {
            let n_left: usize = block_left.iter().sum();
            let left_cursor = AtomicUsize::new(0);
            let right_cursor = AtomicUsize::new(n_left);

            let work: Vec<_> = blocks.into_iter().zip(block_left).collect();
            parallelism.maybe_par_for_each(work, |(block, n_block_left)| {
                let li = left_cursor.fetch_add(n_block_left, Ordering::Relaxed);
                let ri = right_cursor.fetch_add(block.len() - n_block_left, Ordering::Relaxed);
                write_block(&out, block, table, feature, bin, li, ri);
            });
            debug_assert_eq!(left_cursor.load(Ordering::Relaxed), n_left);
            n_left
        }
    }
}

/// Write the rows of one sub-block, left rows from `li` and right rows from
/// `ri`, keeping their order.
///
/// The caller reserves `[li, li + n_left)` and `[ri, ri + n_right)` of `out`
/// for this sub-block alone.
#[allow(clippy::too_many_arguments)]
fn write_block(
    out: &SharedSlice<'_>,
    block: &[u32],
    table: &BinnedTable,
    feature: usize,
    bin: u32,
    mut li: usize,
    mut ri: usize,
) {
    for &row in block {
        let slot = if table.bin(row as usize, feature) <= bin {
            li += 1;
            li - 1
        } else {
            ri += 1;
            ri - 1
        };
        // SAFETY: reserved regions of different sub-blocks are disjoint and
        // lie within `out`: prefix sums or fetch-adds over the block counts,
        // left from 0 and right from the total left count.
        unsafe { out.write(slot, row) };
    }
}

/// Raw view of a mutable slice written through disjoint reserved slots.
struct SharedSlice<'a> {
    ptr: *mut u32,
    len: usize,
    _marker: std::marker::PhantomData<&'a mut [u32]>,
}

// SAFETY: writers only touch disjoint slots (see `write`).
unsafe impl Send for SharedSlice<'_> {}
unsafe impl Sync for SharedSlice<'_> {}

impl<'a> SharedSlice<'a> {
    fn new(slice: &'a mut [u32]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: std::marker::PhantomData,
        }
    }

    /// # Safety
    /// No other thread may access `index` concurrently.
    #[inline]
    unsafe fn write(&self, index: usize, value: u32) {
        assert!(index < self.len);
        *self.ptr.add(index) = value;
    }
}
