//! Class weights for pooled covariance.

use crate::config::ClassWeighting;
use crate::error::Result;
use crate::ids::ClassSlot;
use crate::project::ProjectState;

/// Scale positive weights to sum to one. Non-positive entries become zero.
///
/// All zeros are returned unchanged when nothing is positive.
///
/// # Example
///
/// ```
/// use trainstat_core::weights::normalize_weights;
///
/// assert_eq!(normalize_weights(&[1.0, 0.0, 3.0]), vec![0.25, 0.0, 0.75]);
/// ```
#[must_use]
pub fn normalize_weights(raw: &[f64]) -> Vec<f64> {
    let total: f64 = raw.iter().filter(|&&w| w > 0.0).sum();
    raw.iter()
        .map(|&w| if w > 0.0 && total > 0.0 { w / total } else { 0.0 })
        .collect()
}

/// Normalized weights of `slots`; classes without loaded pixels weigh zero.
pub(crate) fn class_weights(
    state: &ProjectState,
    slots: &[ClassSlot],
    weighting: ClassWeighting,
) -> Result<Vec<f64>> {
    let raw = slots
        .iter()
        .map(|&slot| {
            let class = state.class(slot)?;
            Ok(if class.statistics_pixels == 0 {
                0.0
            } else {
                match weighting {
                    ClassWeighting::Equal => 1.0,
                    ClassWeighting::Prior => class.prior_weight,
                }
            })
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok(normalize_weights(&raw))
}
