//! Testing utilities for binforest.
//!
//! Assertion helpers and synthetic binned datasets shared by unit tests,
//! integration tests and benchmarks.
//!
//! ```ignore
//! use binforest::testing::{synthetic_classification, DEFAULT_TOLERANCE};
//! use binforest::assert_approx_eq;
//! ```

use approx::AbsDiffEq;
use ndarray::Array2;
use rand::prelude::*;

use crate::data::BinnedTable;

// =============================================================================
// Constants
// =============================================================================

/// Default tolerance for floating point comparisons of impurities and errors.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

// =============================================================================
// Floating Point Assertions
// =============================================================================

/// Assert that two f64 values are approximately equal.
///
/// Uses absolute difference comparison with the given tolerance.
///
/// # Examples
///
/// ```
/// # use binforest::assert_approx_eq;
/// assert_approx_eq!(1.0f64, 1.0001f64, 0.001);
/// ```
///
/// # Panics
///
/// Panics if the absolute difference exceeds tolerance.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let tol: f64 = $tolerance;
        let diff = (left_val - right_val).abs();
        if diff > tol {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`\n right: `{:?}`\n  diff: `{:?}` > tolerance `{:?}`",
                left_val, right_val, diff, tol
            );
        }
    }};
    ($left:expr, $right:expr, $tolerance:expr, $($arg:tt)+) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let tol: f64 = $tolerance;
        let diff = (left_val - right_val).abs();
        if diff > tol {
            panic!(
                "assertion failed: `(left ≈ right)` - {}\n  left: `{:?}`\n right: `{:?}`\n  diff: `{:?}` > tolerance `{:?}`",
                format_args!($($arg)+), left_val, right_val, diff, tol
            );
        }
    }};
}

/// Assert that two slices of f64 values are approximately equal element-wise.
///
/// # Panics
///
/// Panics if lengths differ or any element differs by more than tolerance.
pub fn assert_slice_approx_eq(actual: &[f64], expected: &[f64], tolerance: f64, context: &str) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "{context}: length mismatch - got {}, expected {}",
        actual.len(),
        expected.len()
    );

    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            a.abs_diff_eq(e, tolerance),
            "{context}[{i}]: {a} ≠ {e} (diff={}, tolerance={tolerance})",
            (a - e).abs()
        );
    }
}

// =============================================================================
// Synthetic Data
// =============================================================================

/// Generate a random binned table with `n_bins` bins per feature.
///
/// Borders are `0.5, 1.5, ...` so bin `b` holds the raw value `b`.
pub fn random_binned_table(n_rows: usize, n_features: usize, n_bins: u32, seed: u64) -> BinnedTable {
    assert!(n_bins >= 1);
    let mut rng = StdRng::seed_from_u64(seed);
    let codes = Array2::from_shape_fn((n_rows, n_features), |_| rng.gen_range(0..n_bins));
    let borders = (0..n_features).map(|_| unit_borders(n_bins)).collect();
    BinnedTable::new(codes, vec![n_bins; n_features], borders)
        .expect("synthetic table is well formed")
}

/// Borders `b + 0.5` for `b in 0..n_bins`.
pub fn unit_borders(n_bins: u32) -> Vec<f64> {
    (0..n_bins).map(|b| b as f64 + 0.5).collect()
}

/// Synthetic classification problem over a random binned table.
///
/// Labels come from a random linear score per class over the bin codes plus
/// uniform noise; the class with the highest score wins.
pub fn synthetic_classification(
    n_rows: usize,
    n_features: usize,
    n_bins: u32,
    n_classes: u32,
    seed: u64,
) -> (BinnedTable, Vec<f64>) {
    assert!(n_classes >= 2);
    let table = random_binned_table(n_rows, n_features, n_bins, seed);
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));

    let weights: Vec<f64> = (0..n_classes as usize * n_features)
        .map(|_| rng.gen::<f64>() * 2.0 - 1.0)
        .collect();

    let labels = (0..n_rows)
        .map(|r| {
            let row = table.row(r);
            let mut best_class = 0usize;
            let mut best_score = f64::NEG_INFINITY;
            for k in 0..n_classes as usize {
                let w = &weights[k * n_features..(k + 1) * n_features];
                let noise = (rng.gen::<f64>() * 2.0 - 1.0) * 0.5;
                let s: f64 = row.iter().zip(w).map(|(&b, &wi)| b as f64 * wi).sum::<f64>() + noise;
                if s > best_score {
                    best_score = s;
                    best_class = k;
                }
            }
            best_class as f64
        })
        .collect();

    (table, labels)
}

/// Synthetic regression problem: a linear function of the bin codes plus noise.
pub fn synthetic_regression(
    n_rows: usize,
    n_features: usize,
    n_bins: u32,
    seed: u64,
) -> (BinnedTable, Vec<f64>) {
    let table = random_binned_table(n_rows, n_features, n_bins, seed);
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(7));
    let weights: Vec<f64> = (0..n_features).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect();

    let targets = (0..n_rows)
        .map(|r| {
            let row = table.row(r);
            let y: f64 = row.iter().zip(&weights).map(|(&b, &w)| b as f64 * w).sum();
            y + (rng.gen::<f64>() * 2.0 - 1.0) * 0.1
        })
        .collect();

    (table, targets)
}
