//! Project statistics configuration.
//!
//! Every option has a default, so a configuration can be loaded from a
//! partial JSON document:
//!
//! ```
//! use trainstat_core::config::{ProjectConfig, StorageStrategy};
//!
//! let config: ProjectConfig = serde_json::from_str(
//!     r#"{ "channels": [0, 2, 3], "storage": "ClassOnly" }"#,
//! ).unwrap();
//! assert_eq!(config.channel_count(), 3);
//! assert_eq!(config.storage, StorageStrategy::ClassOnly);
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use tally::StatisticsCode;

use crate::error::{Result, StatsError};

/// Where accumulated statistics live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageStrategy {
    /// Every training field keeps its own statistics; classes are combined on
    /// demand.
    PerField,
    /// Only class aggregates are kept; field pixels go straight into their
    /// class.
    ClassOnly,
}

/// Handling of channels whose variance is exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroVariancePolicy {
    /// Replace zero variances in covariance output
    pub enabled: bool,
    /// Replacement variance
    pub factor: f64,
}

impl Default for ZeroVariancePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            factor: 0.1,
        }
    }
}

/// Pixels excluded from training statistics.
///
/// A pixel is skipped when any of its channels holds the no-data value or
/// exceeds the largest usable value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoDataPolicy {
    /// No-data value, matched with a relative tolerance of 1e-8
    pub value: Option<f64>,
    /// Values above this are treated as saturated
    pub max_usable: Option<f64>,
}

impl NoDataPolicy {
    /// True if `value` should be treated as no-data.
    ///
    /// Matches inside the open interval `(0.99999999·v, 1.00000001·v)`, with
    /// the bounds swapped for negative `v`. A no-data value of zero matches
    /// zero exactly.
    #[must_use]
    pub fn is_no_data(&self, value: f64) -> bool {
        let Some(no_data) = self.value else {
            return false;
        };
        if no_data == 0.0 {
            return value == 0.0;
        }
        let (low, high) = if no_data > 0.0 {
            (0.999_999_99 * no_data, 1.000_000_01 * no_data)
        } else {
            (1.000_000_01 * no_data, 0.999_999_99 * no_data)
        };
        value > low && value < high
    }

    /// True if the pixel may be used for statistics.
    #[must_use]
    pub fn accepts(&self, pixel: &[f64]) -> bool {
        pixel.iter().all(|&v| {
            !self.is_no_data(v) && self.max_usable.map_or(true, |max| v <= max)
        })
    }

    /// True if no pixel can be rejected.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.value.is_none() && self.max_usable.is_none()
    }
}

/// How classes are weighted when pooling covariance matrices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassWeighting {
    /// Every class counts the same
    #[default]
    Equal,
    /// Each class counts with its a priori weight
    Prior,
}

/// Configuration of a project's statistics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Image channels statistics are kept for, in statistics order
    pub channels: Vec<usize>,
    /// Second-order statistics kept
    pub statistics_code: StatisticsCode,
    /// Storage strategy, fixed for the life of the project
    pub storage: StorageStrategy,
    /// Zero-variance replacement in covariance output
    pub zero_variance: ZeroVariancePolicy,
    /// Leave-one-out mixing uses the pooled covariance of all classes
    /// instead of the class's own diagonal
    pub use_common_covariance_in_loo: bool,
    /// List at most one conditioning advisory per class
    pub list_one_message_per_class: bool,
    /// Class weighting for pooled covariance
    pub common_covariance_weights: ClassWeighting,
    /// Pixels excluded from statistics
    pub no_data: NoDataPolicy,
    /// Upper bound on statistics storage
    pub max_statistics_bytes: u64,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            channels: vec![0],
            statistics_code: StatisticsCode::MeanCovariance,
            storage: StorageStrategy::PerField,
            zero_variance: ZeroVariancePolicy::default(),
            use_common_covariance_in_loo: true,
            list_one_message_per_class: true,
            common_covariance_weights: ClassWeighting::Equal,
            no_data: NoDataPolicy::default(),
            max_statistics_bytes: 1 << 30,
        }
    }
}

impl ProjectConfig {
    /// Create a config using the first `count` image channels.
    #[must_use]
    pub fn with_channels(count: usize) -> Self {
        Self {
            channels: (0..count).collect(),
            ..Default::default()
        }
    }

    /// Number of statistics channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of second-order entries per accumulator.
    #[must_use]
    pub fn covariance_entries(&self) -> usize {
        self.statistics_code.second_order_len(self.channels.len())
    }

    /// True if only class aggregates are kept.
    #[must_use]
    pub fn keep_class_stats_only(&self) -> bool {
        self.storage == StorageStrategy::ClassOnly
    }

    /// Zero-variance replacement factor if the policy is enabled.
    #[must_use]
    pub fn zero_variance_factor(&self) -> Option<f64> {
        self.zero_variance.enabled.then_some(self.zero_variance.factor)
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidInput`] for an empty channel list or a
    /// non-positive zero-variance factor.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(StatsError::InvalidInput(
                "at least one statistics channel is required".into(),
            ));
        }
        if self.zero_variance.factor.is_nan() || self.zero_variance.factor <= 0.0 {
            return Err(StatsError::InvalidInput(format!(
                "zero variance factor must be positive, got {}",
                self.zero_variance.factor
            )));
        }
        Ok(())
    }
}
