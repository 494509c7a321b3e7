//! # Trainstat Core
//!
//! Training statistics engine for supervised classification of multispectral
//! images.
//!
//! A [`Project`] groups training fields (rectangles, polygons, or labels of a
//! training mask) into classes. Updating the project reads the field pixels
//! through a [`PixelSource`] and accumulates per-channel sums and sums of
//! products; queries then derive class means, standard deviations,
//! covariance and correlation matrices, and pooled covariances for a
//! classifier.
//!
//! ## Architecture
//!
//! - **Records**: [`ClassRecord`] and [`FieldRecord`] hold membership and
//!   freshness flags
//! - **Arena**: [`StatisticsArena`] owns every accumulator, sized to fit
//!   before each update
//! - **Strategies**: [`AggregationStrategy`] decides whether statistics are
//!   kept per field or per class only
//! - **Estimators**: Original, leave-one-out and enhanced class covariance,
//!   plus the weighted pooled covariance
//!
//! Numerical kernels (packed matrices, accumulators, conditioning) live in
//! the [`tally`] crate, re-exported here.
//!
//! ## Usage
//!
//! ```
//! use trainstat_core::{
//!     AreaDescriptor, Estimator, FieldSpec, MatrixShape, MemoryImage, NeverCancel, NullProgress,
//!     Project, ProjectConfig, StatisticsCode, UpdateScope,
//! };
//!
//! let mut image = MemoryImage::from_fn(8, 8, 2, |line, column, channel| {
//!     f64::from(line + column) * (channel as f64 + 1.0)
//! });
//! let mut project = Project::new(ProjectConfig::with_channels(2)).unwrap();
//! let class = project.add_class("forest");
//! project
//!     .add_field(class, FieldSpec::training("stand", AreaDescriptor::rectangle(0, 3, 0, 3)))
//!     .unwrap();
//!
//! project
//!     .update_statistics(UpdateScope::Project, &mut image, &NeverCancel, &mut NullProgress)
//!     .unwrap();
//! assert_eq!(project.class(class).unwrap().statistics_pixels(), 16);
//!
//! let means = project.class_mean_vector(class, None).unwrap();
//! assert_eq!(means, vec![3.0, 6.0]);
//! let covariance = project
//!     .class_covariance(class, None, MatrixShape::Square, StatisticsCode::MeanCovariance, Estimator::Original)
//!     .unwrap();
//! assert_eq!(covariance.order(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

// Re-export tally for matrix and accumulator types
pub use tally;

pub mod advisory;
pub mod aggregation;
pub mod area;
pub mod arena;
pub mod class;
pub mod config;
pub mod control;
pub mod error;
pub mod estimator;
pub mod field;
pub mod ids;
pub mod project;
pub mod scan;
pub mod update;
pub mod weights;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use advisory::Advisory;
pub use aggregation::{AggregationStrategy, ClassOnlyAggregation, PerFieldAggregation};
pub use area::{AreaDescriptor, ColumnSpan, MaskRaster, MemoryImage, PixelSource, PointType, Vertex};
pub use arena::{ArenaLayout, SlotAllocator, StatisticsArena, StatsTarget};
pub use class::{ClassRecord, EnhancedStatistics, Estimator, MixingParameter, ProjectEstimator};
pub use config::{ClassWeighting, NoDataPolicy, ProjectConfig, StorageStrategy, ZeroVariancePolicy};
pub use control::{CancelCheck, CancellationToken, NeverCancel, NullProgress, ProgressEvent, ProgressSink};
pub use error::{PixelReadError, Result, StatsError};
pub use estimator::{
    mix_covariance, ChannelExtremes, ClassSums, CommonCovarianceRequest, ConditionedCovariance,
    FeatureTransform, StatisticsAvailability,
};
pub use field::{FieldFlags, FieldRecord, FieldSpec, FieldType};
pub use ids::{ClassNumber, FieldId};
pub use project::{CommonCovariance, Project, ProjectState};
pub use update::{UpdateScope, UpdateSummary};
pub use tally::{ChannelStats, MatrixShape, PackedMatrix, StatisticsCode};
