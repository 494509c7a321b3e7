//! End-to-end scenarios with known statistics.

use approx::assert_relative_eq;
use tally::{MatrixShape, PackedMatrix, StatisticsCode};

use crate::area::{AreaDescriptor, MaskRaster};
use crate::class::{EnhancedStatistics, Estimator, MixingParameter, ProjectEstimator};
use crate::config::{ProjectConfig, StorageStrategy, ZeroVariancePolicy};
use crate::control::{CancellationToken, NeverCancel, NullProgress, ProgressEvent};
use crate::error::StatsError;
use crate::estimator::{mix_covariance, CommonCovarianceRequest, FeatureTransform};
use crate::field::FieldSpec;
use crate::ids::ClassNumber;
use crate::project::Project;
use crate::update::UpdateScope;

use super::helpers::{
    banded_image, project_with, synthetic_image, update_all, CountdownCancel, FailingSource, BOTH_STORAGES,
};

// =============================================================================
// Aggregation
// =============================================================================

/// Ten pixels of (1, 2) and five pixels of (1, 3) in two fields of one class.
fn two_field_project(storage: StorageStrategy) -> (Project, ClassNumber) {
    let mut project = project_with(storage, 2);
    let class = project.add_class("crop");
    project
        .add_field(class, FieldSpec::training("north", AreaDescriptor::rectangle(0, 0, 0, 9)))
        .unwrap();
    project
        .add_field(class, FieldSpec::training("south", AreaDescriptor::rectangle(1, 1, 0, 4)))
        .unwrap();
    (project, class)
}

#[test]
fn test_two_field_class_statistics() {
    for storage in BOTH_STORAGES {
        let (mut project, class) = two_field_project(storage);
        let mut image = banded_image(10, &[&[1.0, 2.0], &[1.0, 3.0]]);
        let summary = update_all(&mut project, &mut image);

        assert_eq!(summary.pixels_scanned, 15);
        assert_eq!(project.class(class).unwrap().statistics_pixels(), 15);

        let sums = project.class_sums_squares(class, None, MatrixShape::Square).unwrap();
        assert_eq!(sums.channels[0].sum, 15.0);
        assert_eq!(sums.channels[1].sum, 35.0);

        let means = project.class_mean_vector(class, None).unwrap();
        assert_relative_eq!(means[0], 1.0);
        assert_relative_eq!(means[1], 35.0 / 15.0);
        assert_eq!(project.class_minimum_vector(class, None).unwrap(), vec![1.0, 2.0]);
        assert_eq!(project.class_maximum_vector(class, None).unwrap(), vec![1.0, 3.0]);

        let covariance = project
            .class_covariance(class, None, MatrixShape::Square, StatisticsCode::MeanCovariance, Estimator::Original)
            .unwrap();
        assert_relative_eq!(covariance.get(0, 0), 0.0);
        // 10 at 2 and 5 at 3: Σx² = 85, (85 − 35²/15) / 14
        assert_relative_eq!(covariance.get(1, 1), (85.0 - 35.0 * 35.0 / 15.0) / 14.0, epsilon = 1e-12);
        assert_relative_eq!(covariance.get(0, 1), 0.0, epsilon = 1e-12);
    }
}

#[test]
fn test_single_pixel_class_has_zero_covariance() {
    let mut project = project_with(StorageStrategy::PerField, 2);
    let class = project.add_class("dot");
    project
        .add_field(class, FieldSpec::training("px", AreaDescriptor::rectangle(2, 2, 2, 2)))
        .unwrap();
    update_all(&mut project, &mut synthetic_image(1, 4, 4, 2));

    let covariance = project
        .class_covariance(class, None, MatrixShape::Triangle, StatisticsCode::MeanCovariance, Estimator::Original)
        .unwrap();
    assert!(covariance.as_slice().iter().all(|&v| v == 0.0));
    assert_eq!(project.class_std_dev_vector(class, None).unwrap(), vec![0.0, 0.0]);
}

#[test]
fn test_channel_order_follows_request() {
    let mut project = project_with(StorageStrategy::ClassOnly, 3);
    let class = project.add_class("c");
    project
        .add_field(class, FieldSpec::training("f", AreaDescriptor::rectangle(0, 3, 0, 3)))
        .unwrap();
    update_all(&mut project, &mut synthetic_image(7, 4, 4, 3));

    let full = project
        .class_covariance(class, None, MatrixShape::Triangle, StatisticsCode::MeanCovariance, Estimator::Original)
        .unwrap();
    let reduced = project
        .class_covariance(class, Some(&[2, 0]), MatrixShape::Square, StatisticsCode::MeanCovariance, Estimator::Original)
        .unwrap();
    assert_relative_eq!(reduced.get(0, 0), full.get(2, 2), epsilon = 1e-9);
    assert_relative_eq!(reduced.get(1, 0), full.get(2, 0), epsilon = 1e-9);
    assert_relative_eq!(reduced.get(0, 1), full.get(2, 0), epsilon = 1e-9);

    let means = project.class_mean_vector(class, None).unwrap();
    assert_eq!(project.class_mean_vector(class, Some(&[2, 0])).unwrap(), vec![means[2], means[0]]);
    assert!(matches!(
        project.class_mean_vector(class, Some(&[3])),
        Err(StatsError::Matrix(tally::Error::ChannelOutOfRange { channel: 3, channels: 3 }))
    ));
}

#[test]
fn test_polygon_field() {
    let mut project = project_with(StorageStrategy::PerField, 1);
    let class = project.add_class("poly");
    // triangle with corners at (line, column) (0,0), (0,8), (8,0)
    project
        .add_field(
            class,
            FieldSpec::training("tri", AreaDescriptor::polygon(&[(0.0, 0.0), (0.0, 8.0), (8.0, 0.0)])),
        )
        .unwrap();
    update_all(&mut project, &mut synthetic_image(3, 10, 10, 1));

    let pixels = project.class(class).unwrap().statistics_pixels();
    assert!(pixels > 0);
    assert!(pixels < 81);
}

#[test]
fn test_no_data_excluded() {
    let mut config = ProjectConfig::with_channels(1);
    config.no_data.value = Some(-9999.0);
    let mut project = Project::new(config).unwrap();
    let class = project.add_class("water");
    project
        .add_field(class, FieldSpec::training("lake", AreaDescriptor::rectangle(0, 1, 0, 3)))
        .unwrap();
    let mut image = banded_image(4, &[&[-9999.0], &[4.0]]);
    update_all(&mut project, &mut image);

    assert_eq!(project.class(class).unwrap().statistics_pixels(), 4);
    assert_eq!(project.class_mean_vector(class, None).unwrap(), vec![4.0]);
}

#[test]
fn test_training_mask_and_areas_together() {
    for storage in BOTH_STORAGES {
        let mut project = project_with(storage, 1);
        let class = project.add_class("mixed");
        project
            .add_field(class, FieldSpec::training("rect", AreaDescriptor::rectangle(0, 0, 0, 1)))
            .unwrap();
        let masked = project
            .add_field(class, FieldSpec::training("mask", AreaDescriptor::Mask { value: 5 }))
            .unwrap();
        project
            .set_training_mask(Some(MaskRaster::new(1, 0, 1, 3, vec![5, 0, 5]).unwrap()))
            .unwrap();

        let mut image = banded_image(3, &[&[2.0], &[8.0]]);
        let summary = update_all(&mut project, &mut image);
        assert_eq!(summary.fields_scanned, 1);
        assert_eq!(summary.mask_fields_scanned, 1);
        assert_eq!(project.field(masked).unwrap().pixels_used(), 2);
        assert_eq!(project.class(class).unwrap().statistics_pixels(), 4);
        assert_eq!(project.class_mean_vector(class, None).unwrap(), vec![5.0]);
    }
}

#[test]
fn test_field_scope_under_class_only_loads_field() {
    let mut project = project_with(StorageStrategy::ClassOnly, 1);
    let class = project.add_class("c");
    let first = project
        .add_field(class, FieldSpec::training("f1", AreaDescriptor::rectangle(0, 0, 0, 1)))
        .unwrap();
    project
        .add_field(class, FieldSpec::training("f2", AreaDescriptor::rectangle(1, 1, 0, 1)))
        .unwrap();
    let mut image = banded_image(2, &[&[2.0], &[6.0]]);

    project
        .update_statistics(UpdateScope::Field(first), &mut image, &NeverCancel, &mut NullProgress)
        .unwrap();
    assert!(project.field(first).unwrap().is_loaded());
    assert_eq!(project.class(class).unwrap().statistics_pixels(), 2);
    assert!(!project.class(class).unwrap().is_up_to_date());

    let summary = project
        .update_statistics(UpdateScope::Class(class), &mut image, &NeverCancel, &mut NullProgress)
        .unwrap();
    assert_eq!(summary.fields_scanned, 1);
    assert!(summary.up_to_date);
    assert_eq!(project.class_mean_vector(class, None).unwrap(), vec![4.0]);
}

// =============================================================================
// Failure, Cancellation, Resources
// =============================================================================

#[test]
fn test_read_failure_leaves_field_stale() {
    for storage in BOTH_STORAGES {
        let mut project = project_with(storage, 2);
        let class = project.add_class("c");
        let field = project
            .add_field(class, FieldSpec::training("f", AreaDescriptor::rectangle(0, 2, 0, 2)))
            .unwrap();
        let mut source = FailingSource::new(synthetic_image(5, 4, 4, 2), 1);

        let err = project
            .update_statistics(UpdateScope::Project, &mut source, &NeverCancel, &mut NullProgress)
            .unwrap_err();
        assert!(matches!(err, StatsError::PixelRead(ref e) if e.line == 1));
        assert!(!project.field(field).unwrap().is_up_to_date());
        assert!(!project.field(field).unwrap().is_loaded());
        assert!(!project.class(class).unwrap().is_up_to_date());
        assert!(!project.is_up_to_date());

        update_all(&mut project, &mut synthetic_image(5, 4, 4, 2));
        assert_eq!(project.class(class).unwrap().statistics_pixels(), 9);
        assert!(project.is_up_to_date());
    }
}

#[test]
fn test_mask_failure_under_class_only_rebuilds_class() {
    let mut project = project_with(StorageStrategy::ClassOnly, 1);
    let class = project.add_class("c");
    let rect = project
        .add_field(class, FieldSpec::training("rect", AreaDescriptor::rectangle(0, 0, 0, 2)))
        .unwrap();
    project
        .add_field(class, FieldSpec::training("mask", AreaDescriptor::Mask { value: 1 }))
        .unwrap();
    project
        .set_training_mask(Some(MaskRaster::new(1, 0, 2, 3, vec![1, 1, 1, 1, 1, 1]).unwrap()))
        .unwrap();

    let mut source = FailingSource::new(synthetic_image(9, 3, 3, 1), 2);
    assert!(project
        .update_statistics(UpdateScope::Project, &mut source, &NeverCancel, &mut NullProgress)
        .is_err());
    assert_eq!(project.class(class).unwrap().statistics_pixels(), 0);
    assert!(!project.field(rect).unwrap().is_loaded());

    update_all(&mut project, &mut synthetic_image(9, 3, 3, 1));
    assert_eq!(project.class(class).unwrap().statistics_pixels(), 9);
}

#[test]
fn test_resource_limit_checked_before_reading() {
    let mut config = ProjectConfig::with_channels(4);
    config.max_statistics_bytes = 64;
    let mut project = Project::new(config).unwrap();
    let class = project.add_class("c");
    for n in 0..4 {
        project
            .add_field(class, FieldSpec::training(format!("f{n}"), AreaDescriptor::rectangle(0, 1, 0, 1)))
            .unwrap();
    }
    let mut source = FailingSource::new(synthetic_image(2, 4, 4, 4), u32::MAX);

    let err = project
        .update_statistics(UpdateScope::Project, &mut source, &NeverCancel, &mut NullProgress)
        .unwrap_err();
    assert!(matches!(err, StatsError::ResourceExhausted { limit: 64, .. }));
    assert_eq!(source.reads, 0);
}

#[test]
fn test_cancellation_during_scan() {
    let mut project = project_with(StorageStrategy::PerField, 1);
    let class = project.add_class("c");
    let field = project
        .add_field(class, FieldSpec::training("f", AreaDescriptor::rectangle(0, 5, 0, 5)))
        .unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = project
        .update_statistics(UpdateScope::Class(class), &mut synthetic_image(1, 6, 6, 1), &token, &mut NullProgress)
        .unwrap_err();
    assert!(err.is_canceled());
    assert!(!project.field(field).unwrap().is_up_to_date());

    token.reset();
    let mut events: Vec<ProgressEvent> = Vec::new();
    project
        .update_statistics(UpdateScope::Class(class), &mut synthetic_image(1, 6, 6, 1), &token, &mut events)
        .unwrap();
    assert!(project.class(class).unwrap().is_up_to_date());
    assert!(events.contains(&ProgressEvent::Lines { done: 6, total: 6 }));
}

// =============================================================================
// Invalidation
// =============================================================================

#[test]
fn test_membership_changes_invalidate() {
    for storage in BOTH_STORAGES {
        let mut project = project_with(storage, 1);
        let a = project.add_class("a");
        let b = project.add_class("b");
        let f1 = project
            .add_field(a, FieldSpec::training("f1", AreaDescriptor::rectangle(0, 0, 0, 3)))
            .unwrap();
        project
            .add_field(b, FieldSpec::training("f2", AreaDescriptor::rectangle(1, 1, 0, 3)))
            .unwrap();
        let mut image = banded_image(4, &[&[1.0], &[5.0], &[9.0]]);
        update_all(&mut project, &mut image);
        project
            .common_covariance(
                &CommonCovarianceRequest {
                    update_project_cache: true,
                    ..CommonCovarianceRequest::all(MatrixShape::Triangle)
                },
                &NeverCancel,
                &mut NullProgress,
            )
            .unwrap();
        assert_eq!(project.number_common_covariance_classes(), 2);

        let f3 = project
            .add_field(a, FieldSpec::training("f3", AreaDescriptor::rectangle(2, 2, 0, 3)))
            .unwrap();
        assert!(!project.class(a).unwrap().is_up_to_date());
        assert!(project.class(b).unwrap().is_up_to_date());
        assert!(!project.is_up_to_date());
        assert_eq!(project.number_common_covariance_classes(), 0);
        update_all(&mut project, &mut image);
        assert_eq!(project.class(a).unwrap().statistics_pixels(), 8);
        assert_eq!(project.class_mean_vector(a, None).unwrap(), vec![5.0]);

        project.move_field(f3, b).unwrap();
        assert!(!project.class(a).unwrap().is_up_to_date());
        assert!(!project.class(b).unwrap().is_up_to_date());
        update_all(&mut project, &mut image);
        assert_eq!(project.class(a).unwrap().statistics_pixels(), 4);
        assert_eq!(project.class(b).unwrap().statistics_pixels(), 8);
        assert_eq!(project.class_mean_vector(b, None).unwrap(), vec![7.0]);

        project.remove_field(f1).unwrap();
        update_all(&mut project, &mut image);
        assert_eq!(
            project.class_mean_vector(a, None),
            Err(StatsError::NoStatistics(0))
        );
    }
}

#[test]
fn test_test_fields_do_not_invalidate() {
    let mut project = project_with(StorageStrategy::PerField, 1);
    let class = project.add_class("a");
    project
        .add_field(class, FieldSpec::training("f", AreaDescriptor::rectangle(0, 0, 0, 1)))
        .unwrap();
    update_all(&mut project, &mut synthetic_image(4, 2, 2, 1));
    project
        .add_field(class, FieldSpec::test("check", AreaDescriptor::rectangle(1, 1, 0, 1)))
        .unwrap();
    assert!(project.is_up_to_date());
}

// =============================================================================
// Estimators
// =============================================================================

#[test]
fn test_leave_one_out_blend() {
    let original = PackedMatrix::from_lower(2, MatrixShape::Square, |i, j| if i == j { 4.0 } else { 1.0 });
    let common = PackedMatrix::from_lower(2, MatrixShape::Square, |i, j| if i == j { 2.0 } else { 0.0 });
    let mixed = mix_covariance(&original, &common, 0.3).unwrap();
    let expected = [3.4, 0.7, 0.7, 3.4];
    for (value, expected) in mixed.as_slice().iter().zip(expected) {
        assert_relative_eq!(*value, expected, epsilon = 1e-12);
    }
}

/// Two classes over random pixels, both statistics up to date.
fn two_class_project(config: ProjectConfig) -> (Project, ClassNumber, ClassNumber) {
    let mut project = Project::new(config).unwrap();
    let a = project.add_class("a");
    let b = project.add_class("b");
    project
        .add_field(a, FieldSpec::training("fa", AreaDescriptor::rectangle(0, 4, 0, 4)))
        .unwrap();
    project
        .add_field(b, FieldSpec::training("fb", AreaDescriptor::rectangle(5, 9, 0, 4)))
        .unwrap();
    update_all(&mut project, &mut synthetic_image(11, 10, 5, 2));
    (project, a, b)
}

fn original(project: &mut Project, class: ClassNumber) -> PackedMatrix {
    project
        .class_covariance(class, None, MatrixShape::Triangle, StatisticsCode::MeanCovariance, Estimator::Original)
        .unwrap()
}

#[test]
fn test_leave_one_out_with_pooled_covariance() {
    let (mut project, a, b) = two_class_project(ProjectConfig::with_channels(2));
    project.set_mixing_parameter(a, MixingParameter::UserSet(0.3)).unwrap();

    let oa = original(&mut project, a);
    let ob = original(&mut project, b);
    let loo = project
        .class_covariance(a, None, MatrixShape::Triangle, StatisticsCode::MeanCovariance, Estimator::LeaveOneOut)
        .unwrap();
    assert_eq!(project.number_common_covariance_classes(), 2);

    for i in 0..2 {
        for j in 0..=i {
            let common = 0.5 * oa.get(i, j) + 0.5 * ob.get(i, j);
            assert_relative_eq!(loo.get(i, j), 0.7 * oa.get(i, j) + 0.3 * common, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_leave_one_out_with_own_diagonal() {
    let mut config = ProjectConfig::with_channels(2);
    config.use_common_covariance_in_loo = false;
    let (mut project, a, _) = two_class_project(config);
    project.set_loo_covariance_value(a, Some(0.3)).unwrap();

    let oa = original(&mut project, a);
    let loo = project
        .class_covariance(a, None, MatrixShape::Triangle, StatisticsCode::MeanCovariance, Estimator::LeaveOneOut)
        .unwrap();
    assert_relative_eq!(loo.get(0, 0), oa.get(0, 0), epsilon = 1e-9);
    assert_relative_eq!(loo.get(1, 0), 0.7 * oa.get(1, 0), epsilon = 1e-9);
    assert_eq!(project.number_common_covariance_classes(), 0);
}

#[test]
fn test_leave_one_out_needs_optimum() {
    let (mut project, a, _) = two_class_project(ProjectConfig::with_channels(2));
    let err = project
        .class_covariance(a, None, MatrixShape::Triangle, StatisticsCode::MeanCovariance, Estimator::LeaveOneOut)
        .unwrap_err();
    assert_eq!(err, StatsError::MixingParameterUnavailable(0));

    project.set_mixing_parameter(a, MixingParameter::IdentityMatrix).unwrap();
    let identity = project
        .class_covariance(a, None, MatrixShape::Square, StatisticsCode::MeanCovariance, Estimator::LeaveOneOut)
        .unwrap();
    assert_eq!(identity.as_slice(), &[1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn test_pooled_cancel_keeps_cache() {
    let mut project = project_with(StorageStrategy::PerField, 1);
    for (n, line) in (0..3).enumerate() {
        let class = project.add_class(format!("c{n}"));
        project
            .add_field(class, FieldSpec::training("f", AreaDescriptor::rectangle(line, line, 0, 3)))
            .unwrap();
    }
    update_all(&mut project, &mut synthetic_image(21, 3, 4, 1));
    let mut request = CommonCovarianceRequest::all(MatrixShape::Triangle);
    request.update_project_cache = true;

    let err = project
        .common_covariance(&request, &CountdownCancel::after(2), &mut NullProgress)
        .unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(project.number_common_covariance_classes(), 0);

    project.common_covariance(&request, &NeverCancel, &mut NullProgress).unwrap();
    assert_eq!(project.number_common_covariance_classes(), 3);
    let cached = project.common_covariance_cache().matrix().cloned();

    let mut events: Vec<ProgressEvent> = Vec::new();
    assert!(project
        .common_covariance(&request, &CountdownCancel::after(2), &mut events)
        .is_err());
    assert_eq!(events.len(), 2);
    assert_eq!(project.number_common_covariance_classes(), 3);
    assert_eq!(project.common_covariance_cache().matrix().cloned(), cached);
}

#[test]
fn test_pooled_cancel_lists_no_advisories() {
    let mut config = ProjectConfig::with_channels(1);
    config.zero_variance = ZeroVariancePolicy {
        enabled: true,
        factor: 0.5,
    };
    let mut project = Project::new(config).unwrap();
    for line in 0..3 {
        let class = project.add_class(format!("flat{line}"));
        project
            .add_field(class, FieldSpec::training("f", AreaDescriptor::rectangle(line, line, 0, 3)))
            .unwrap();
    }
    update_all(&mut project, &mut banded_image(4, &[&[1.0], &[2.0], &[3.0]]));
    let request = CommonCovarianceRequest::all(MatrixShape::Triangle);

    let err = project
        .common_covariance(&request, &CountdownCancel::after(2), &mut NullProgress)
        .unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(project.advisories_listed(), 0);

    let pooled = project.common_covariance(&request, &NeverCancel, &mut NullProgress).unwrap();
    assert_relative_eq!(pooled.get(0, 0), 0.5);
    assert_eq!(project.advisories_listed(), 3);
}

#[test]
fn test_prior_weights() {
    let mut config = ProjectConfig::with_channels(2);
    config.common_covariance_weights = crate::config::ClassWeighting::Prior;
    let (mut project, a, b) = two_class_project(config);
    project.set_class_weight(a, 3.0).unwrap();
    project.set_class_weight(b, 1.0).unwrap();
    let oa = original(&mut project, a);
    let ob = original(&mut project, b);

    let pooled = project
        .common_covariance(&CommonCovarianceRequest::all(MatrixShape::Triangle), &NeverCancel, &mut NullProgress)
        .unwrap();
    assert_relative_eq!(pooled.get(1, 0), 0.75 * oa.get(1, 0) + 0.25 * ob.get(1, 0), epsilon = 1e-9);

    project.set_class_weight(b, 0.0).unwrap();
    let pooled = project
        .common_covariance(&CommonCovarianceRequest::all(MatrixShape::Triangle), &NeverCancel, &mut NullProgress)
        .unwrap();
    assert_relative_eq!(pooled.get(1, 1), oa.get(1, 1), epsilon = 1e-9);
}

#[test]
fn test_enhanced_falls_back_to_original() {
    let (mut project, a, b) = two_class_project(ProjectConfig::with_channels(2));
    let plain = project
        .class_covariance(a, None, MatrixShape::Triangle, StatisticsCode::MeanCovariance, Estimator::Enhanced)
        .unwrap();
    assert_eq!(plain, original(&mut project, a));

    let supplied = PackedMatrix::from_lower(2, MatrixShape::Triangle, |i, j| if i == j { 9.0 } else { 2.0 });
    project
        .set_enhanced_statistics(b, Some(EnhancedStatistics::new(vec![10.0, 20.0], &supplied)))
        .unwrap();
    project.set_class_estimator(b, Estimator::Enhanced).unwrap();
    let enhanced = project
        .class_covariance(b, Some(&[1]), MatrixShape::Square, StatisticsCode::MeanCovariance, Estimator::Enhanced)
        .unwrap();
    assert_eq!(enhanced.as_slice(), &[9.0]);
    assert_eq!(project.class_mean_vector(b, None).unwrap(), vec![10.0, 20.0]);
    assert_eq!(project.class_std_dev_vector(b, None).unwrap(), vec![3.0, 3.0]);
}

#[test]
fn test_mixed_estimator_policy() {
    let (mut project, a, b) = two_class_project(ProjectConfig::with_channels(2));
    project.set_class_estimator(a, Estimator::LeaveOneOut).unwrap();
    assert_eq!(project.project_estimator(), ProjectEstimator::Mixed);

    let supplied = PackedMatrix::identity(2, MatrixShape::Triangle);
    project
        .set_enhanced_statistics(b, Some(EnhancedStatistics::new(vec![0.0, 0.0], &supplied)))
        .unwrap();
    let summary = project.set_project_estimator(ProjectEstimator::Uniform(Estimator::Enhanced));
    assert_eq!(project.class(a).unwrap().estimator(), Estimator::LeaveOneOut);
    assert_eq!(project.class(b).unwrap().estimator(), Estimator::Enhanced);
    assert_eq!(summary, ProjectEstimator::Mixed);

    let summary = project.set_project_estimator(ProjectEstimator::Uniform(Estimator::Original));
    assert_eq!(summary, ProjectEstimator::Uniform(Estimator::Original));
}

#[test]
fn test_statistics_code_limit() {
    let mut config = ProjectConfig::with_channels(2);
    config.statistics_code = StatisticsCode::MeanOnly;
    let (mut project, a, _) = two_class_project(config);

    let err = project
        .class_covariance(a, None, MatrixShape::Square, StatisticsCode::MeanCovariance, Estimator::Original)
        .unwrap_err();
    assert!(matches!(err, StatsError::InvalidInput(_)));

    let diagonal = project
        .class_covariance(a, None, MatrixShape::Square, StatisticsCode::MeanOnly, Estimator::Original)
        .unwrap();
    assert_eq!(diagonal.get(0, 1), 0.0);
    let sd = project.class_std_dev_vector(a, None).unwrap();
    assert_relative_eq!(diagonal.get(1, 1), sd[1] * sd[1], epsilon = 1e-9);
}

#[test]
fn test_statistics_available() {
    let (mut project, a, _) = two_class_project(ProjectConfig::with_channels(2));
    let loo = project.statistics_available(a, Estimator::LeaveOneOut).unwrap();
    assert!(!loo.exists);
    assert!(loo.needs_common_covariance);

    project.set_loo_covariance_value(a, Some(0.5)).unwrap();
    project
        .class_covariance(a, None, MatrixShape::Triangle, StatisticsCode::MeanCovariance, Estimator::LeaveOneOut)
        .unwrap();
    let loo = project.statistics_available(a, Estimator::LeaveOneOut).unwrap();
    assert!(loo.exists);
    assert!(!loo.needs_common_covariance);

    let empty = project.add_class("empty");
    assert!(!project.statistics_available(empty, Estimator::Original).unwrap().exists);
}

// =============================================================================
// Conditioning
// =============================================================================

#[test]
fn test_zero_variance_substitution() {
    let mut config = ProjectConfig::with_channels(2);
    config.zero_variance = ZeroVariancePolicy {
        enabled: true,
        factor: 0.25,
    };
    let mut project = Project::new(config).unwrap();
    let class = project.add_class("flat");
    project
        .add_field(class, FieldSpec::training("f", AreaDescriptor::rectangle(0, 1, 0, 3)))
        .unwrap();
    update_all(&mut project, &mut banded_image(4, &[&[7.0, 1.0], &[7.0, 3.0]]));

    let covariance = project
        .class_covariance(class, None, MatrixShape::Square, StatisticsCode::MeanCovariance, Estimator::Original)
        .unwrap();
    assert_eq!(covariance.get(0, 0), 0.25);
    assert!(covariance.get(1, 1) > 0.0);
    assert_eq!(project.advisories_listed(), 1);

    project
        .class_covariance(class, None, MatrixShape::Square, StatisticsCode::MeanCovariance, Estimator::Original)
        .unwrap();
    assert_eq!(project.advisories_listed(), 1);
    project.reset_class_list_messages();
    project
        .class_covariance(class, None, MatrixShape::Square, StatisticsCode::MeanCovariance, Estimator::Original)
        .unwrap();
    assert_eq!(project.advisories_listed(), 2);
}

#[test]
fn test_conditioned_covariance_with_transform() {
    let mut config = ProjectConfig::with_channels(2);
    config.zero_variance = ZeroVariancePolicy {
        enabled: true,
        factor: 1.0,
    };
    let mut project = Project::new(config).unwrap();
    let class = project.add_class("flat");
    project
        .add_field(class, FieldSpec::training("f", AreaDescriptor::rectangle(0, 0, 0, 3)))
        .unwrap();
    update_all(&mut project, &mut banded_image(4, &[&[5.0, 5.0]]));

    let conditioned = project
        .conditioned_class_covariance(class, None, MatrixShape::Square, None)
        .unwrap();
    assert!(conditioned.report.zero_variances_reset);
    assert_eq!(conditioned.matrix.as_slice(), &[1.0, 0.0, 0.0, 1.0]);

    let transform = FeatureTransform::new(1, 2, vec![1.0, 1.0]).unwrap();
    let projected = project
        .conditioned_class_covariance(class, None, MatrixShape::Square, Some(&transform))
        .unwrap();
    assert_eq!(projected.matrix.order(), 1);
    assert_eq!(projected.matrix.as_slice(), &[1.0]);

    let mismatched = FeatureTransform::new(1, 3, vec![1.0; 3]).unwrap();
    assert!(matches!(
        project.conditioned_class_covariance(class, None, MatrixShape::Square, Some(&mismatched)),
        Err(StatsError::Matrix(_))
    ));
}

#[test]
fn test_project_channel_extremes() {
    let mut project = project_with(StorageStrategy::PerField, 2);
    assert_eq!(project.project_channel_extremes(None).unwrap(), None);
    let a = project.add_class("a");
    let b = project.add_class("b");
    project
        .add_field(a, FieldSpec::training("fa", AreaDescriptor::rectangle(0, 0, 0, 1)))
        .unwrap();
    project
        .add_field(b, FieldSpec::training("fb", AreaDescriptor::rectangle(1, 1, 0, 1)))
        .unwrap();
    update_all(&mut project, &mut banded_image(2, &[&[1.0, 9.0], &[4.0, 2.0]]));

    let extremes = project.project_channel_extremes(None).unwrap().unwrap();
    assert_eq!(extremes.minimums, vec![1.0, 2.0]);
    assert_eq!(extremes.maximums, vec![4.0, 9.0]);
}

#[test]
fn test_config_round_trip_drives_project() {
    let json = r#"{ "channels": [1, 0], "storage": "ClassOnly" }"#;
    let config: ProjectConfig = serde_json::from_str(json).unwrap();
    let mut project = Project::new(config).unwrap();
    let class = project.add_class("c");
    project
        .add_field(class, FieldSpec::training("f", AreaDescriptor::rectangle(0, 0, 0, 1)))
        .unwrap();
    update_all(&mut project, &mut banded_image(2, &[&[1.0, 2.0]]));
    assert_eq!(project.class_mean_vector(class, None).unwrap(), vec![2.0, 1.0]);
}
