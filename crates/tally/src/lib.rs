//! # Tally
//!
//! Packed covariance arithmetic for multichannel imagery.
//!
//! Tally holds the first- and second-order sums that training statistics are
//! built from, and turns them into means, standard deviations, covariance and
//! correlation matrices. Symmetric matrices are stored packed:
//!
//! - **Triangle**: lower triangle only, entry `(i, j)` with `i >= j` at
//!   `i * (i + 1) / 2 + j`
//! - **Square**: full row-major `n * n` storage whose upper triangle mirrors
//!   the lower triangle
//!
//! ## Quick Start
//!
//! ```
//! use tally::{MatrixShape, StatisticsCode, StatsAccumulator};
//!
//! let mut acc = StatsAccumulator::new(2, StatisticsCode::MeanCovariance);
//! acc.add_pixel(&[1.0, 2.0]);
//! acc.add_pixel(&[3.0, 6.0]);
//!
//! let cov = acc.covariance(2, MatrixShape::Square);
//! assert_eq!(cov.get(0, 0), 2.0);
//! assert_eq!(cov.get(0, 1), 4.0);
//! assert_eq!(cov.get(1, 0), 4.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod accumulator;
pub mod channel;
pub mod condition;
pub mod covariance;
pub mod packed;
pub mod sums;

// Re-exports for convenience
pub use accumulator::StatsAccumulator;
pub use channel::{merge_channels, ChannelStats, Moments};
pub use condition::{
    condition, reset_for_all_variances_equal, reset_zero_variances, ConditionPolicy,
    ConditionReport,
};
pub use covariance::{
    compute_covariance, correlation_from_covariance, std_dev_from_covariance,
};
pub use packed::{
    mirror_lower_to_upper, triangle_index, triangle_len, MatrixShape, PackedMatrix,
};
pub use sums::SumSquares;

use serde::{Deserialize, Serialize};

/// Errors raised by packed matrix operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A channel or feature index does not exist in the source.
    #[error("channel {channel} is out of range for {channels} channels")]
    ChannelOutOfRange {
        /// The offending index
        channel: usize,
        /// Number of channels available
        channels: usize,
    },
    /// Two operands disagree on their dimensions.
    #[error("dimension mismatch: expected {expected}, found {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Dimension that was supplied
        actual: usize,
    },
}

/// Which second-order statistics are kept.
///
/// The ordering is meaningful: a request may ask for a code at or below the
/// code the statistics were accumulated with, never above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatisticsCode {
    /// Means and standard deviations only; sums of squares keep the diagonal.
    MeanOnly,
    /// Means and the full covariance matrix.
    MeanCovariance,
}

impl StatisticsCode {
    /// Number of second-order entries kept for `channels` channels.
    ///
    /// # Example
    ///
    /// ```
    /// use tally::StatisticsCode;
    ///
    /// assert_eq!(StatisticsCode::MeanOnly.second_order_len(4), 4);
    /// assert_eq!(StatisticsCode::MeanCovariance.second_order_len(4), 10);
    /// ```
    #[must_use]
    pub const fn second_order_len(self, channels: usize) -> usize {
        match self {
            Self::MeanOnly => channels,
            Self::MeanCovariance => triangle_len(channels),
        }
    }

    /// True if off-diagonal products are kept.
    #[must_use]
    pub const fn keeps_covariance(self) -> bool {
        matches!(self, Self::MeanCovariance)
    }
}

impl Default for StatisticsCode {
    fn default() -> Self {
        Self::MeanCovariance
    }
}

/// Resolve an optional channel list against `available` channels.
///
/// `None` or an empty list means every channel in order. Every listed
/// channel must be below `available`.
///
/// # Errors
///
/// Returns [`Error::ChannelOutOfRange`] for the first invalid index.
pub fn resolve_channels(list: Option<&[usize]>, available: usize) -> Result<Vec<usize>, Error> {
    match list {
        Some(list) if !list.is_empty() => {
            if let Some(&channel) = list.iter().find(|&&c| c >= available) {
                return Err(Error::ChannelOutOfRange {
                    channel,
                    channels: available,
                });
            }
            Ok(list.to_vec())
        }
        _ => Ok((0..available).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_code_ordering() {
        assert!(StatisticsCode::MeanOnly < StatisticsCode::MeanCovariance);
        assert!(StatisticsCode::MeanCovariance.keeps_covariance());
        assert!(!StatisticsCode::MeanOnly.keeps_covariance());
    }

    #[test]
    fn test_resolve_channels_identity() {
        assert_eq!(resolve_channels(None, 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(resolve_channels(Some(&[]), 2).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_resolve_channels_rejects_out_of_range() {
        let err = resolve_channels(Some(&[0, 4]), 3).unwrap_err();
        assert_eq!(
            err,
            Error::ChannelOutOfRange {
                channel: 4,
                channels: 3
            }
        );
    }

    #[test]
    fn test_statistics_code_serde() {
        let json = serde_json::to_string(&StatisticsCode::MeanOnly).unwrap();
        let back: StatisticsCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StatisticsCode::MeanOnly);
    }
}
