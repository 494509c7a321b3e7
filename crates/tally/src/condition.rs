//! Numerical conditioning of covariance matrices.
//!
//! Covariance matrices handed to a classifier must be invertible. Two
//! degenerate cases are patched in place:
//!
//! - a channel with exactly zero variance gets a small positive variance
//! - a matrix whose lower-triangle entries are all identical (which happens
//!   when a class has a single distinct pixel value in every channel) keeps
//!   its diagonal and loses its off-diagonal terms
//!
//! Both passes respect the matrix shape and run in that order.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::packed::PackedMatrix;
use crate::StatisticsCode;

/// What [`condition`] should do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionPolicy {
    /// Replacement for zero variances, `None` to leave them alone
    pub zero_variance_factor: Option<f64>,
    /// Statistics code of the matrix; mean-only matrices skip the
    /// equal-variance check
    pub code: StatisticsCode,
}

/// Which conditioning passes changed the matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionReport {
    /// At least one zero variance was replaced
    pub zero_variances_reset: bool,
    /// Off-diagonal terms were cleared because every entry was equal
    pub variances_equal_reset: bool,
}

impl ConditionReport {
    /// True if the matrix was modified.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.zero_variances_reset || self.variances_equal_reset
    }
}

/// Replace every diagonal entry that is exactly zero with `factor`.
///
/// Returns true if any entry was replaced.
pub fn reset_zero_variances(matrix: &mut PackedMatrix, factor: f64) -> bool {
    let mut reset = false;
    for i in 0..matrix.order() {
        if matrix.get(i, i) == 0.0 {
            matrix.set(i, i, factor);
            reset = true;
        }
    }
    if reset {
        trace!(order = matrix.order(), factor, "zero variances replaced");
    }
    reset
}

/// Clear off-diagonal terms if every lower-triangle entry equals the first.
///
/// Only applies to covariance matrices of order greater than one. Returns
/// true if the matrix was changed.
pub fn reset_for_all_variances_equal(matrix: &mut PackedMatrix, code: StatisticsCode) -> bool {
    let order = matrix.order();
    if order <= 1 || !code.keeps_covariance() {
        return false;
    }

    let first = matrix.get(0, 0);
    let all_equal = (0..order).all(|i| (0..=i).all(|j| matrix.get(i, j) == first));
    if !all_equal {
        return false;
    }

    matrix.retain_diagonal();
    trace!(order, value = first, "equal covariance entries reduced to diagonal");
    true
}

/// Run both conditioning passes.
///
/// # Example
///
/// ```
/// use tally::{condition, ConditionPolicy, MatrixShape, PackedMatrix, StatisticsCode};
///
/// let mut cov = PackedMatrix::from_lower(2, MatrixShape::Square, |_, _| 0.0);
/// let report = condition(
///     &mut cov,
///     ConditionPolicy { zero_variance_factor: Some(0.5), code: StatisticsCode::MeanCovariance },
/// );
/// assert!(report.zero_variances_reset);
/// assert_eq!(cov.as_slice(), &[0.5, 0.0, 0.0, 0.5]);
/// ```
pub fn condition(matrix: &mut PackedMatrix, policy: ConditionPolicy) -> ConditionReport {
    let zero_variances_reset = policy
        .zero_variance_factor
        .is_some_and(|factor| reset_zero_variances(matrix, factor));
    let variances_equal_reset = reset_for_all_variances_equal(matrix, policy.code);
    ConditionReport {
        zero_variances_reset,
        variances_equal_reset,
    }
}
