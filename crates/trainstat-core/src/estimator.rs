//! Class statistics queries and covariance estimators.
//!
//! Queries read the class aggregate a strategy forms from current storage and
//! never rescan the image. Three covariance estimators are available per
//! class:
//!
//! - **Original**: sample covariance of the training pixels
//! - **Leave-one-out**: `(1 − λ)·original + λ·common`, where the common
//!   matrix is the pooled project covariance or the class's own diagonal
//! - **Enhanced**: externally supplied statistics; classes without them fall
//!   back to Original silently
//!
//! # Example
//!
//! ```
//! use tally::{MatrixShape, PackedMatrix};
//! use trainstat_core::estimator::mix_covariance;
//!
//! let original = PackedMatrix::from_lower(2, MatrixShape::Square, |i, j| if i == j { 4.0 } else { 1.0 });
//! let common = PackedMatrix::from_lower(2, MatrixShape::Square, |i, j| if i == j { 2.0 } else { 0.0 });
//! let mixed = mix_covariance(&original, &common, 0.5).unwrap();
//! assert_eq!(mixed.as_slice(), &[3.0, 0.5, 0.5, 3.0]);
//! ```

use serde::{Deserialize, Serialize};
use tally::{
    condition, correlation_from_covariance, reset_zero_variances, ChannelStats, ConditionPolicy,
    ConditionReport, MatrixShape, PackedMatrix, StatisticsCode, StatsAccumulator,
};
use tracing::{debug, info};

use crate::advisory::Advisory;
use crate::class::{Estimator, MixingParameter, ProjectEstimator};
use crate::control::{CancelCheck, NeverCancel, NullProgress, ProgressEvent, ProgressSink};
use crate::error::{Result, StatsError};
use crate::ids::{ClassNumber, ClassSlot};
use crate::project::{CommonCovariance, Project};
use crate::weights::class_weights;

// =============================================================================
// Query Types
// =============================================================================

/// Raw sums of a class over a channel list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSums {
    /// First-order statistics per channel
    pub channels: Vec<ChannelStats>,
    /// Sums of products; diagonal only for mean-only statistics
    pub sums: PackedMatrix,
    /// Pixels accumulated
    pub pixels: u64,
}

/// Channel minimums and maximums over every class with statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelExtremes {
    /// Smallest value seen per channel
    pub minimums: Vec<f64>,
    /// Largest value seen per channel
    pub maximums: Vec<f64>,
}

/// Whether a class can serve an estimator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsAvailability {
    /// The statistics can be produced from what is stored
    pub exists: bool,
    /// The pooled project covariance must be computed first
    pub needs_common_covariance: bool,
}

/// Parameters of a pooled covariance computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonCovarianceRequest {
    /// Classes to pool; `None` pools every class
    pub classes: Option<Vec<ClassNumber>>,
    /// Statistics channels; `None` keeps all
    pub channels: Option<Vec<usize>>,
    /// Output storage shape
    pub shape: MatrixShape,
    /// Statistics code of each class covariance
    pub code: StatisticsCode,
    /// Estimator applied to each class
    pub estimator: ProjectEstimator,
    /// Store the result as the project cache
    pub update_project_cache: bool,
}

impl CommonCovarianceRequest {
    /// Pool every class over every channel with the Original estimator.
    #[must_use]
    pub fn all(shape: MatrixShape) -> Self {
        Self {
            classes: None,
            channels: None,
            shape,
            code: StatisticsCode::MeanCovariance,
            estimator: ProjectEstimator::Uniform(Estimator::Original),
            update_project_cache: false,
        }
    }
}

/// Linear feature transform `T`, `features × channels`, row major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTransform {
    features: usize,
    channels: usize,
    coefficients: Vec<f64>,
}

impl FeatureTransform {
    /// Create a transform.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidInput`] unless `coefficients` holds
    /// `features * channels` values and both counts are positive.
    pub fn new(features: usize, channels: usize, coefficients: Vec<f64>) -> Result<Self> {
        if features == 0 || channels == 0 || coefficients.len() != features * channels {
            return Err(StatsError::InvalidInput(format!(
                "transform of {features}x{channels} needs {} coefficients, got {}",
                features * channels,
                coefficients.len()
            )));
        }
        Ok(Self {
            features,
            channels,
            coefficients,
        })
    }

    /// Output features.
    #[must_use]
    pub fn features(&self) -> usize {
        self.features
    }

    /// Input channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    fn coefficient(&self, feature: usize, channel: usize) -> f64 {
        self.coefficients[feature * self.channels + channel]
    }

    /// `T · C · Tᵀ`, in the shape of `covariance`.
    ///
    /// # Errors
    ///
    /// Returns [`tally::Error::DimensionMismatch`] if the covariance order is
    /// not the transform's channel count.
    pub fn apply(&self, covariance: &PackedMatrix) -> std::result::Result<PackedMatrix, tally::Error> {
        let n = self.channels;
        if covariance.order() != n {
            return Err(tally::Error::DimensionMismatch {
                expected: n,
                actual: covariance.order(),
            });
        }
        let mut left = vec![0.0; self.features * n];
        for i in 0..self.features {
            for b in 0..n {
                left[i * n + b] = (0..n).map(|a| self.coefficient(i, a) * covariance.get(a, b)).sum();
            }
        }
        Ok(PackedMatrix::from_lower(self.features, covariance.shape(), |i, j| {
            (0..n).map(|b| left[i * n + b] * self.coefficient(j, b)).sum()
        }))
    }
}

/// Covariance after conditioning, with what conditioning changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionedCovariance {
    /// Conditioned matrix
    pub matrix: PackedMatrix,
    /// Adjustments made
    pub report: ConditionReport,
}

/// `(1 − λ)·original + λ·common`, in the shape of `original`.
///
/// # Errors
///
/// Returns [`StatsError::Matrix`] if the orders differ.
pub fn mix_covariance(original: &PackedMatrix, common: &PackedMatrix, lambda: f64) -> Result<PackedMatrix> {
    let mut mixed = original.clone();
    mixed.blend(common, lambda)?;
    Ok(mixed)
}

// =============================================================================
// Channel Statistics
// =============================================================================

impl Project {
    fn statistics_channels(&self, channels: Option<&[usize]>) -> Result<Vec<usize>> {
        Ok(tally::resolve_channels(channels, self.state.config.channel_count())?)
    }

    fn check_code(&self, code: StatisticsCode) -> Result<()> {
        if code > self.state.config.statistics_code {
            return Err(StatsError::InvalidInput(format!(
                "{code:?} statistics requested but only {:?} are kept",
                self.state.config.statistics_code
            )));
        }
        Ok(())
    }

    fn slot_with_pixels(&self, class: ClassNumber) -> Result<(ClassSlot, u64)> {
        let slot = self.state.slot_of(class)?;
        let pixels = self.state.class(slot)?.statistics_pixels;
        if pixels == 0 {
            return Err(StatsError::NoStatistics(class.as_u32()));
        }
        Ok((slot, pixels))
    }

    fn combined(&self, slot: ClassSlot, channels: &[usize], code: StatisticsCode) -> Result<StatsAccumulator> {
        self.strategy.combine_class(&self.state, slot, channels, code)
    }

    /// Per-channel statistics of a class with fresh moments.
    ///
    /// Classes using the Enhanced estimator report enhanced means and
    /// standard deviations; minimums and maximums always come from the
    /// training pixels.
    ///
    /// # Errors
    ///
    /// - [`StatsError::InvalidClass`] for an unknown class
    /// - [`StatsError::Matrix`] for an out-of-range channel
    /// - [`StatsError::NoStatistics`] if the class has neither pixels nor
    ///   enhanced statistics in use
    pub fn class_channel_statistics(
        &self,
        class: ClassNumber,
        channels: Option<&[usize]>,
    ) -> Result<Vec<ChannelStats>> {
        let slot = self.state.slot_of(class)?;
        let list = self.statistics_channels(channels)?;
        let record = self.state.class(slot)?;
        let enhanced = match record.estimator {
            Estimator::Enhanced => record.enhanced.as_ref(),
            Estimator::Original | Estimator::LeaveOneOut => None,
        };
        let pixels = record.statistics_pixels;
        if pixels == 0 && enhanced.is_none() {
            return Err(StatsError::NoStatistics(class.as_u32()));
        }

        let mut stats = if pixels > 0 {
            let mut combined = self.combined(slot, &list, StatisticsCode::MeanOnly)?;
            combined.derive(pixels);
            combined.channels().to_vec()
        } else {
            vec![ChannelStats::new(); list.len()]
        };
        if let Some(enhanced) = enhanced {
            for (stat, &channel) in stats.iter_mut().zip(&list) {
                let sum = stat.sum;
                *stat = ChannelStats::with_moments(
                    enhanced.means[channel],
                    enhanced.covariance.get(channel, channel).abs().sqrt(),
                    stat.minimum,
                    stat.maximum,
                );
                stat.sum = sum;
            }
        }
        Ok(stats)
    }

    /// Class means over `channels`.
    ///
    /// # Errors
    ///
    /// See [`class_channel_statistics`](Self::class_channel_statistics).
    pub fn class_mean_vector(&self, class: ClassNumber, channels: Option<&[usize]>) -> Result<Vec<f64>> {
        Ok(self
            .class_channel_statistics(class, channels)?
            .iter()
            .map(|s| s.mean().unwrap_or(0.0))
            .collect())
    }

    /// Class standard deviations over `channels`.
    ///
    /// # Errors
    ///
    /// See [`class_channel_statistics`](Self::class_channel_statistics).
    pub fn class_std_dev_vector(&self, class: ClassNumber, channels: Option<&[usize]>) -> Result<Vec<f64>> {
        Ok(self
            .class_channel_statistics(class, channels)?
            .iter()
            .map(|s| s.std_dev().unwrap_or(0.0))
            .collect())
    }

    /// Class minimums over `channels`.
    ///
    /// # Errors
    ///
    /// See [`class_channel_statistics`](Self::class_channel_statistics).
    pub fn class_minimum_vector(&self, class: ClassNumber, channels: Option<&[usize]>) -> Result<Vec<f64>> {
        Ok(self
            .class_channel_statistics(class, channels)?
            .iter()
            .map(|s| s.minimum)
            .collect())
    }

    /// Class maximums over `channels`.
    ///
    /// # Errors
    ///
    /// See [`class_channel_statistics`](Self::class_channel_statistics).
    pub fn class_maximum_vector(&self, class: ClassNumber, channels: Option<&[usize]>) -> Result<Vec<f64>> {
        Ok(self
            .class_channel_statistics(class, channels)?
            .iter()
            .map(|s| s.maximum)
            .collect())
    }

    /// Raw sums of a class.
    ///
    /// # Errors
    ///
    /// [`StatsError::NoStatistics`] for a class without pixels, plus the
    /// class and channel errors of the other queries.
    pub fn class_sums_squares(
        &self,
        class: ClassNumber,
        channels: Option<&[usize]>,
        shape: MatrixShape,
    ) -> Result<ClassSums> {
        let (slot, pixels) = self.slot_with_pixels(class)?;
        let list = self.statistics_channels(channels)?;
        let combined = self.combined(slot, &list, self.state.config.statistics_code)?;
        let sums = PackedMatrix::from_lower(list.len(), shape, |i, j| combined.sums().get(i, j));
        Ok(ClassSums {
            channels: combined.channels().to_vec(),
            sums,
            pixels,
        })
    }

    /// Channel extremes over every class with pixels; `None` if no class has
    /// any.
    ///
    /// # Errors
    ///
    /// [`StatsError::Matrix`] for an out-of-range channel.
    pub fn project_channel_extremes(&self, channels: Option<&[usize]>) -> Result<Option<ChannelExtremes>> {
        let list = self.statistics_channels(channels)?;
        let mut extremes: Option<ChannelExtremes> = None;
        for slot in self.state.ordered_slots() {
            if self.state.class(slot)?.statistics_pixels == 0 {
                continue;
            }
            let combined = self.combined(slot, &list, StatisticsCode::MeanOnly)?;
            let found = extremes.get_or_insert_with(|| ChannelExtremes {
                minimums: vec![f64::MAX; list.len()],
                maximums: vec![-f64::MAX; list.len()],
            });
            for (k, stat) in combined.channels().iter().enumerate() {
                found.minimums[k] = found.minimums[k].min(stat.minimum);
                found.maximums[k] = found.maximums[k].max(stat.maximum);
            }
        }
        Ok(extremes)
    }

    /// Whether `class` can serve `estimator` right now.
    ///
    /// # Errors
    ///
    /// [`StatsError::InvalidClass`] for an unknown class.
    pub fn statistics_available(&self, class: ClassNumber, estimator: Estimator) -> Result<StatisticsAvailability> {
        let record = self.class(class)?;
        let has_pixels = record.statistics_pixels > 0;
        let common_missing =
            self.state.config.use_common_covariance_in_loo && self.state.common.matrix().is_none();
        Ok(match estimator {
            Estimator::Original => StatisticsAvailability {
                exists: has_pixels,
                needs_common_covariance: false,
            },
            Estimator::Enhanced => StatisticsAvailability {
                exists: has_pixels || record.enhanced.is_some(),
                needs_common_covariance: false,
            },
            Estimator::LeaveOneOut => match record.mixing {
                MixingParameter::IdentityMatrix => StatisticsAvailability {
                    exists: has_pixels,
                    needs_common_covariance: false,
                },
                MixingParameter::UserSet(_) => StatisticsAvailability {
                    exists: has_pixels,
                    needs_common_covariance: common_missing,
                },
                MixingParameter::ComputedOptimum => StatisticsAvailability {
                    exists: has_pixels && record.loo_value.is_some(),
                    needs_common_covariance: common_missing,
                },
            },
        })
    }

    // =========================================================================
    // Covariance
    // =========================================================================

    /// Covariance of a class in triangle form, before zero-variance handling.
    fn estimate_covariance(
        &mut self,
        slot: ClassSlot,
        channels: &[usize],
        code: StatisticsCode,
        estimator: Estimator,
    ) -> Result<PackedMatrix> {
        let record = self.state.class(slot)?;
        if estimator == Estimator::Enhanced {
            if let Some(enhanced) = &record.enhanced {
                let mut matrix = enhanced.covariance.reduce(Some(channels), MatrixShape::Triangle)?;
                if !code.keeps_covariance() {
                    matrix.retain_diagonal();
                }
                return Ok(matrix);
            }
        }

        let pixels = record.statistics_pixels;
        if pixels == 0 {
            return Err(StatsError::NoStatistics(self.state.number_of(slot)));
        }
        let mut combined = self.combined(slot, channels, code)?;
        let original = combined.covariance(pixels, MatrixShape::Triangle);
        if estimator == Estimator::LeaveOneOut && code.keeps_covariance() {
            return self.leave_one_out(slot, channels, original);
        }
        Ok(original)
    }

    fn leave_one_out(&mut self, slot: ClassSlot, channels: &[usize], original: PackedMatrix) -> Result<PackedMatrix> {
        let record = self.state.class(slot)?;
        let lambda = match record.mixing {
            MixingParameter::IdentityMatrix => {
                return Ok(PackedMatrix::identity(channels.len(), MatrixShape::Triangle));
            }
            MixingParameter::UserSet(lambda) => lambda,
            MixingParameter::ComputedOptimum => record
                .loo_value
                .ok_or_else(|| StatsError::MixingParameterUnavailable(self.state.number_of(slot)))?,
        };

        let common = if self.state.config.use_common_covariance_in_loo {
            match self.project_common_covariance()? {
                Some(full) => full.reduce(Some(channels), MatrixShape::Triangle)?,
                None => return Ok(original),
            }
        } else {
            let mut diagonal = original.clone();
            diagonal.retain_diagonal();
            diagonal
        };
        mix_covariance(&original, &common, lambda)
    }

    /// Pooled covariance over every class and channel, from the cache when
    /// valid. `None` when no class has statistics.
    fn project_common_covariance(&mut self) -> Result<Option<PackedMatrix>> {
        if let Some(matrix) = self.state.common.matrix() {
            return Ok(Some(matrix.clone()));
        }
        let mut request = CommonCovarianceRequest::all(MatrixShape::Triangle);
        request.update_project_cache = true;
        let pooled = self.common_covariance(&request, &NeverCancel, &mut NullProgress)?;
        Ok((self.state.common.classes > 0).then_some(pooled))
    }

    /// Covariance of one class, zero variances replaced when configured.
    fn covariance_for_output(
        &mut self,
        slot: ClassSlot,
        channels: &[usize],
        code: StatisticsCode,
        estimator: Estimator,
    ) -> Result<PackedMatrix> {
        let (matrix, reset) = self.covariance_with_reset(slot, channels, code, estimator)?;
        if reset {
            self.state.list_advisory(slot, Advisory::ZeroVariancesReset);
        }
        Ok(matrix)
    }

    /// Estimated covariance plus whether zero variances were replaced.
    fn covariance_with_reset(
        &mut self,
        slot: ClassSlot,
        channels: &[usize],
        code: StatisticsCode,
        estimator: Estimator,
    ) -> Result<(PackedMatrix, bool)> {
        let mut matrix = self.estimate_covariance(slot, channels, code, estimator)?;
        let reset = match self.state.config.zero_variance_factor() {
            Some(factor) => reset_zero_variances(&mut matrix, factor),
            None => false,
        };
        Ok((matrix, reset))
    }

    /// Covariance of a class with the given estimator.
    ///
    /// # Arguments
    ///
    /// * `class` - Class to query
    /// * `channels` - Statistics channels, `None` for all
    /// * `shape` - Output storage
    /// * `code` - `MeanOnly` returns the diagonal only
    /// * `estimator` - Original, leave-one-out or enhanced
    ///
    /// # Errors
    ///
    /// - [`StatsError::InvalidInput`] if `code` exceeds the project's code
    /// - [`StatsError::NoStatistics`] for a class without pixels
    /// - [`StatsError::MixingParameterUnavailable`] for leave-one-out with an
    ///   optimum that has not been computed
    pub fn class_covariance(
        &mut self,
        class: ClassNumber,
        channels: Option<&[usize]>,
        shape: MatrixShape,
        code: StatisticsCode,
        estimator: Estimator,
    ) -> Result<PackedMatrix> {
        self.check_code(code)?;
        let slot = self.state.slot_of(class)?;
        let list = self.statistics_channels(channels)?;
        Ok(self.covariance_for_output(slot, &list, code, estimator)?.to_shape(shape))
    }

    /// Correlation matrix of a class with its own estimator.
    ///
    /// # Errors
    ///
    /// As [`class_covariance`](Self::class_covariance); the project must keep
    /// covariance statistics.
    pub fn class_correlation(
        &mut self,
        class: ClassNumber,
        channels: Option<&[usize]>,
        shape: MatrixShape,
    ) -> Result<PackedMatrix> {
        self.check_code(StatisticsCode::MeanCovariance)?;
        let slot = self.state.slot_of(class)?;
        let list = self.statistics_channels(channels)?;
        let estimator = self.state.class(slot)?.estimator;
        let covariance = self.estimate_covariance(slot, &list, StatisticsCode::MeanCovariance, estimator)?;
        Ok(correlation_from_covariance(&covariance.to_shape(shape)))
    }

    /// Class covariance with its own estimator, optionally transformed, then
    /// conditioned for inversion.
    ///
    /// # Errors
    ///
    /// As [`class_covariance`](Self::class_covariance), plus
    /// [`StatsError::Matrix`] if the transform does not match the channels.
    pub fn conditioned_class_covariance(
        &mut self,
        class: ClassNumber,
        channels: Option<&[usize]>,
        shape: MatrixShape,
        transform: Option<&FeatureTransform>,
    ) -> Result<ConditionedCovariance> {
        let slot = self.state.slot_of(class)?;
        let list = self.statistics_channels(channels)?;
        let code = self.state.config.statistics_code;
        let estimator = self.state.class(slot)?.estimator;

        let mut covariance = self.estimate_covariance(slot, &list, code, estimator)?;
        if let Some(transform) = transform {
            covariance = transform.apply(&covariance)?;
        }
        let mut matrix = covariance.to_shape(shape);
        let report = condition(
            &mut matrix,
            ConditionPolicy {
                zero_variance_factor: self.state.config.zero_variance_factor(),
                code,
            },
        );
        self.state.list_condition_report(slot, report);
        Ok(ConditionedCovariance { matrix, report })
    }

    /// Weighted pooled covariance `Σ wₖ·Covₖ` over the requested classes.
    ///
    /// Weights follow the project's class weighting and are normalized over
    /// classes with positive weight and loaded pixels. Cancellation is
    /// polled after each pooled class; the project cache is only written
    /// when the whole pass completes.
    ///
    /// # Errors
    ///
    /// - [`StatsError::Canceled`] if cancellation is observed
    /// - [`StatsError::InvalidInput`] if the code exceeds the project's code
    /// - any error of the per-class estimator
    pub fn common_covariance(
        &mut self,
        request: &CommonCovarianceRequest,
        cancel: &dyn CancelCheck,
        progress: &mut dyn ProgressSink,
    ) -> Result<PackedMatrix> {
        self.check_code(request.code)?;
        let list = self.statistics_channels(request.channels.as_deref())?;
        let slots = match &request.classes {
            Some(classes) => classes
                .iter()
                .map(|&class| self.state.slot_of(class))
                .collect::<Result<Vec<_>>>()?,
            None => self.state.ordered_slots(),
        };
        let weights = class_weights(&self.state, &slots, self.state.config.common_covariance_weights)?;
        let total = weights.iter().filter(|&&w| w > 0.0).count();

        let mut pooled = PackedMatrix::zeros(list.len(), MatrixShape::Triangle);
        let mut pooled_classes = 0_u32;
        let mut reset_slots = Vec::new();
        for (&slot, &weight) in slots.iter().zip(&weights) {
            if weight <= 0.0 {
                continue;
            }
            let estimator = request.estimator.resolve(self.state.class(slot)?.estimator);
            let (covariance, reset) = self.covariance_with_reset(slot, &list, request.code, estimator)?;
            if reset {
                reset_slots.push(slot);
            }
            pooled.add_scaled(&covariance, weight)?;
            pooled_classes += 1;
            progress.report(ProgressEvent::ClassPooled {
                done: pooled_classes as usize,
                total,
            });
            if cancel.is_canceled() {
                info!(pooled = pooled_classes, total, "pooled covariance canceled");
                return Err(StatsError::Canceled);
            }
        }

        // Advisories of a canceled run are dropped with the rest of its output.
        for slot in reset_slots {
            self.state.list_advisory(slot, Advisory::ZeroVariancesReset);
        }
        if request.update_project_cache {
            let full = list.len() == self.state.config.channel_count()
                && list.iter().enumerate().all(|(k, &c)| k == c);
            self.state.common = CommonCovariance {
                matrix: full.then(|| pooled.clone()),
                classes: pooled_classes,
            };
        }
        debug!(classes = pooled_classes, "pooled covariance computed");
        Ok(pooled.to_shape(request.shape))
    }

    // =========================================================================
    // Estimator Settings
    // =========================================================================

    /// Set the estimator of one class.
    ///
    /// Choosing leave-one-out with an optimum that has not been computed
    /// empties the pooled covariance cache so it is rebuilt before use.
    ///
    /// # Errors
    ///
    /// [`StatsError::InvalidClass`] for an unknown class.
    pub fn set_class_estimator(&mut self, class: ClassNumber, estimator: Estimator) -> Result<()> {
        let slot = self.state.slot_of(class)?;
        let record = self.state.class_mut(slot)?;
        record.estimator = estimator;
        let needs_optimum = estimator == Estimator::LeaveOneOut
            && record.mixing == MixingParameter::ComputedOptimum
            && record.loo_value.is_none();
        if needs_optimum {
            self.state.common.invalidate();
        }
        self.state.refresh_estimator_summary();
        Ok(())
    }

    /// Apply a project-wide estimator setting and return the resulting
    /// summary.
    ///
    /// `Uniform` sets every class, except that classes without enhanced
    /// statistics keep their own setting when Enhanced is requested (and
    /// drop back to Original if they were Enhanced). `Mixed` leaves every
    /// class as it is.
    pub fn set_project_estimator(&mut self, estimator: ProjectEstimator) -> ProjectEstimator {
        if let ProjectEstimator::Uniform(requested) = estimator {
            let mut needs_optimum = false;
            for class in self.state.classes.iter_mut().flatten() {
                if requested == Estimator::Enhanced && class.enhanced.is_none() {
                    if class.estimator == Estimator::Enhanced {
                        class.estimator = Estimator::Original;
                    }
                    continue;
                }
                class.estimator = requested;
                needs_optimum |= requested == Estimator::LeaveOneOut
                    && class.mixing == MixingParameter::ComputedOptimum
                    && class.loo_value.is_none();
            }
            if needs_optimum {
                self.state.common.invalidate();
            }
        }
        self.state.refresh_estimator_summary();
        self.state.estimator
    }
}
