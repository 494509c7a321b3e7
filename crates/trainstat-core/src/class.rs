//! Class records and covariance estimator choices.

use serde::{Deserialize, Serialize};
use tally::{MatrixShape, PackedMatrix};

use crate::ids::FieldId;

/// Covariance estimator a class uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Estimator {
    /// Sample covariance of the training pixels
    #[default]
    Original,
    /// Sample covariance mixed with a common covariance
    LeaveOneOut,
    /// Externally supplied enhanced statistics, falling back to `Original`
    Enhanced,
}

/// Estimator setting summarized over every class of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectEstimator {
    /// Every class uses the same estimator
    Uniform(Estimator),
    /// Classes use different estimators
    Mixed,
}

impl Default for ProjectEstimator {
    fn default() -> Self {
        Self::Uniform(Estimator::Original)
    }
}

impl ProjectEstimator {
    /// Summarize a set of class estimators.
    ///
    /// An empty set summarizes to `Uniform(Original)`.
    #[must_use]
    pub fn summarize(estimators: impl IntoIterator<Item = Estimator>) -> Self {
        let mut iter = estimators.into_iter();
        let Some(first) = iter.next() else {
            return Self::default();
        };
        if iter.all(|e| e == first) {
            Self::Uniform(first)
        } else {
            Self::Mixed
        }
    }

    /// Estimator to use for a class whose own setting is `class_estimator`.
    #[must_use]
    pub fn resolve(self, class_estimator: Estimator) -> Estimator {
        match self {
            Self::Uniform(estimator) => estimator,
            Self::Mixed => class_estimator,
        }
    }
}

/// How the leave-one-out mixing weight is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum MixingParameter {
    /// Weight computed by an optimizer and stored on the class
    #[default]
    ComputedOptimum,
    /// Weight set by the user, in `[0, 1]`
    UserSet(f64),
    /// Replace the covariance by the identity matrix
    IdentityMatrix,
}

/// Statistics supplied for a class from outside the training pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedStatistics {
    /// Mean of every statistics channel
    pub means: Vec<f64>,
    /// Covariance over every statistics channel
    pub covariance: PackedMatrix,
}

impl EnhancedStatistics {
    /// Create enhanced statistics; the covariance is stored as a triangle.
    #[must_use]
    pub fn new(means: Vec<f64>, covariance: &PackedMatrix) -> Self {
        Self {
            means,
            covariance: covariance.to_shape(MatrixShape::Triangle),
        }
    }

    /// Number of channels covered.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.means.len()
    }
}

/// A class and its statistics bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    /// Display name
    pub name: String,
    /// Member fields in display order
    pub(crate) fields: Vec<FieldId>,
    /// Training pixels loaded into the class aggregate
    pub(crate) statistics_pixels: u64,
    pub(crate) stats_up_to_date: bool,
    pub(crate) estimator: Estimator,
    pub(crate) mixing: MixingParameter,
    /// Optimized leave-one-out weight, `None` until computed
    pub(crate) loo_value: Option<f64>,
    pub(crate) enhanced: Option<EnhancedStatistics>,
    /// Armed while the class may still list a conditioning advisory
    pub(crate) list_message: bool,
    pub(crate) prior_weight: f64,
}

impl ClassRecord {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            statistics_pixels: 0,
            stats_up_to_date: false,
            estimator: Estimator::Original,
            mixing: MixingParameter::ComputedOptimum,
            loo_value: None,
            enhanced: None,
            list_message: true,
            prior_weight: 1.0,
        }
    }

    /// Member fields in order.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    /// Training pixels loaded into the class.
    #[must_use]
    pub fn statistics_pixels(&self) -> u64 {
        self.statistics_pixels
    }

    /// True if the class aggregate reflects every training field.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.stats_up_to_date
    }

    /// Estimator setting.
    #[must_use]
    pub fn estimator(&self) -> Estimator {
        self.estimator
    }

    /// Leave-one-out mixing setting.
    #[must_use]
    pub fn mixing(&self) -> MixingParameter {
        self.mixing
    }

    /// Optimized leave-one-out weight.
    #[must_use]
    pub fn loo_value(&self) -> Option<f64> {
        self.loo_value
    }

    /// True if enhanced statistics are attached.
    #[must_use]
    pub fn has_enhanced(&self) -> bool {
        self.enhanced.is_some()
    }

    /// A priori class weight.
    #[must_use]
    pub fn prior_weight(&self) -> f64 {
        self.prior_weight
    }
}
