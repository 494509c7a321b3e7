//! Covariance, correlation and deviation vectors from accumulated sums.

use crate::channel::ChannelStats;
use crate::packed::{MatrixShape, PackedMatrix};
use crate::sums::SumSquares;

/// Sample covariance matrix of `count` pixels.
///
/// Off-diagonal entries are `(Σxixj − sum_i·sum_j/n) / (n − 1)`; the
/// diagonal is the variance each channel derives for itself, so stale
/// channel moments are refreshed as a side effect. With one pixel or none
/// every entry is zero. Sums that keep only the diagonal give a diagonal
/// matrix.
///
/// # Arguments
///
/// * `channels` - First-order statistics, one per channel of `sums`
/// * `sums` - Second-order sums over the same pixels
/// * `count` - Number of pixels accumulated
/// * `shape` - Output storage shape
///
/// # Example
///
/// ```
/// use tally::{compute_covariance, ChannelStats, MatrixShape, StatisticsCode, SumSquares};
///
/// let mut channels = [ChannelStats::new(); 2];
/// let mut sums = SumSquares::new(2, StatisticsCode::MeanCovariance);
/// for pixel in [[1.0, 1.0], [3.0, 5.0]] {
///     channels[0].add_sample(pixel[0]);
///     channels[1].add_sample(pixel[1]);
///     sums.add_pixel(&pixel);
/// }
/// let cov = compute_covariance(&mut channels, &sums, 2, MatrixShape::Triangle);
/// assert_eq!(cov.as_slice(), &[2.0, 4.0, 8.0]);
/// ```
#[must_use]
pub fn compute_covariance(
    channels: &mut [ChannelStats],
    sums: &SumSquares,
    count: u64,
    shape: MatrixShape,
) -> PackedMatrix {
    let order = channels.len();
    let variances: Vec<f64> = channels
        .iter_mut()
        .enumerate()
        .map(|(i, c)| c.derive(sums.diagonal(i), count))
        .collect();

    if count <= 1 {
        return PackedMatrix::zeros(order, shape);
    }

    let n = count as f64;
    let keep_off_diagonal = sums.code().keeps_covariance();
    PackedMatrix::from_lower(order, shape, |i, j| {
        if i == j {
            variances[i]
        } else if keep_off_diagonal {
            (sums.get(i, j) - channels[i].sum * channels[j].sum / n) / (n - 1.0)
        } else {
            0.0
        }
    })
}

/// Standard deviations from a covariance diagonal, `sqrt(|c_ii|)`.
#[must_use]
pub fn std_dev_from_covariance(covariance: &PackedMatrix) -> Vec<f64> {
    covariance
        .diagonal()
        .into_iter()
        .map(|v| v.abs().sqrt())
        .collect()
}

/// Correlation matrix from a covariance matrix.
///
/// Entry `(i, j)` is `c_ij / (s_i · s_j)`. Rows and columns of channels with
/// zero standard deviation are zero, including their diagonal.
#[must_use]
pub fn correlation_from_covariance(covariance: &PackedMatrix) -> PackedMatrix {
    let std_devs = std_dev_from_covariance(covariance);
    PackedMatrix::from_lower(covariance.order(), covariance.shape(), |i, j| {
        let denominator = std_devs[i] * std_devs[j];
        if denominator > 0.0 {
            covariance.get(i, j) / denominator
        } else {
            0.0
        }
    })
}
