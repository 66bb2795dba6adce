use std::f64::consts::PI;

use float_cmp::{ApproxEq, F64Margin};
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

use crate::model_elements::frame_elements::*;

fn assert_isometry_eq(expected: &Isometry3<f64>, actual: &Isometry3<f64>) {
    let expected = expected.to_homogeneous();
    let actual = actual.to_homogeneous();
    for (a, b) in expected.iter().zip(actual.iter()) {
        assert!(
            (*a).approx_eq(
                *b,
                F64Margin {
                    ulps: 2,
                    epsilon: 1e-9
                }
            ),
            "Expected {:.5} and {:.5} to be equal within 2 ulps or 1e-9",
            *a,
            *b
        );
    }
}

fn revolute_joint(limits: JointLimits) -> Joint {
    Joint::new(
        "a".to_string(),
        JointID::new(0),
        JointKind::Revolute,
        Vector3::z(),
        FrameID::new(0),
        FrameID::new(1),
        Isometry3::from_parts(Translation3::new(1.0, 0.0, 0.0), UnitQuaternion::identity()),
        limits,
    )
}

// FrameID tests

#[test]
fn when_comparing_ids_with_the_same_index_should_be_equal() {
    let id = FrameID::new(3);
    let copy = id;

    assert_eq!(id, copy);
    assert_eq!(3, id.index());
    assert_ne!(FrameID::new(4), id);
}

#[test]
fn when_formatting_ids_should_include_the_index() {
    assert_eq!("FrameID [2]", format!("{}", FrameID::new(2)));
    assert_eq!("JointID [7]", format!("{}", JointID::new(7)));
}

// JointKind tests

#[test]
fn when_checking_movability_only_fixed_joints_should_be_static() {
    assert!(!JointKind::Fixed.is_movable());
    assert!(JointKind::Revolute.is_movable());
    assert!(JointKind::Prismatic.is_movable());
}

// JointLimits tests

#[test]
fn when_clamping_a_value_should_stay_within_the_limits() {
    let limits = JointLimits::new(-1.0, 2.0);

    assert_eq!(-1.0, limits.clamp(-5.0));
    assert_eq!(0.5, limits.clamp(0.5));
    assert_eq!(2.0, limits.clamp(5.0));

    assert!(limits.contains(-1.0));
    assert!(limits.contains(2.0));
    assert!(!limits.contains(2.1));

    assert_eq!(3.0, limits.range());
    assert_eq!(0.5, limits.midpoint());
}

#[test]
fn when_creating_unbounded_limits_should_accept_any_value() {
    let limits = JointLimits::unbounded();

    assert!(!limits.is_bounded());
    assert_eq!(1e9, limits.clamp(1e9));
    assert_eq!(-1e9, limits.clamp(-1e9));
    assert_eq!(limits, JointLimits::default());
}

#[test]
fn when_sampling_unbounded_limits_should_use_the_fallback_interval() {
    let limits = JointLimits::unbounded();

    assert_eq!((-PI, PI), limits.sampling_interval(JointKind::Revolute));
    assert_eq!((-1.0, 1.0), limits.sampling_interval(JointKind::Prismatic));

    let half_bounded = JointLimits::new(0.5, f64::INFINITY);
    assert_eq!(
        (0.5, PI),
        half_bounded.sampling_interval(JointKind::Revolute)
    );

    let bounded = JointLimits::new(-0.2, 0.3);
    assert_eq!((-0.2, 0.3), bounded.sampling_interval(JointKind::Revolute));
}

// ReferenceFrame tests

#[test]
fn when_creating_reference_frame_should_be_initialized() {
    let name = "a".to_string();
    let id = FrameID::new(5);

    let element = ReferenceFrame::new(name.clone(), id);

    assert_eq!(name, element.name());
    assert_eq!(&id, element.id());
}

// Joint tests

#[test]
fn when_creating_joint_should_be_initialized() {
    let limits = JointLimits::new(-1.0, 1.0);
    let joint = revolute_joint(limits);

    assert_eq!("a", joint.name());
    assert_eq!(JointID::new(0), joint.id());
    assert_eq!(JointKind::Revolute, joint.kind());
    assert_eq!(&Vector3::z(), joint.axis());
    assert_eq!(FrameID::new(0), joint.parent());
    assert_eq!(FrameID::new(1), joint.child());
    assert_eq!(&limits, joint.limits());
    assert_eq!(0.0, joint.position());
}

#[test]
fn when_setting_the_position_should_clamp_to_the_limits() {
    let mut joint = revolute_joint(JointLimits::new(-1.0, 1.0));

    joint.set_position(0.5);
    assert_eq!(0.5, joint.position());

    joint.set_position(3.0);
    assert_eq!(1.0, joint.position());
}

#[test]
fn when_setting_the_position_of_a_fixed_joint_should_stay_at_zero() {
    let mut joint = Joint::new(
        "fixed".to_string(),
        JointID::new(1),
        JointKind::Fixed,
        Vector3::x(),
        FrameID::new(0),
        FrameID::new(1),
        Isometry3::identity(),
        JointLimits::unbounded(),
    );

    joint.set_position(1.0);
    assert_eq!(0.0, joint.position());
    assert_isometry_eq(&Isometry3::identity(), &joint.transform_for_position(1.0));
}

#[test]
fn when_computing_the_transform_of_a_revolute_joint_should_rotate_after_the_origin() {
    let joint = revolute_joint(JointLimits::unbounded());

    let transform = joint.transform_for_position(0.5 * PI);

    // The child x-axis points along the parent y-axis, offset by the origin.
    let point = transform.transform_point(&Point3::new(1.0, 0.0, 0.0));
    assert!((point.x - 1.0).abs() < 1e-12);
    assert!((point.y - 1.0).abs() < 1e-12);
    assert!(point.z.abs() < 1e-12);

    let expected = Isometry3::from_parts(
        Translation3::new(1.0, 0.0, 0.0),
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5 * PI),
    );
    assert_isometry_eq(&expected, &transform);
}

#[test]
fn when_computing_the_transform_of_a_prismatic_joint_should_translate_along_the_axis() {
    let joint = Joint::new(
        "slide".to_string(),
        JointID::new(2),
        JointKind::Prismatic,
        Vector3::y(),
        FrameID::new(0),
        FrameID::new(1),
        Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 1.0),
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.5 * PI),
        ),
        JointLimits::new(0.0, 1.0),
    );

    let transform = joint.transform_for_position(0.25);

    // Motion along the child y-axis, which is the parent z-axis after the origin rotation.
    let expected = Isometry3::from_parts(
        Translation3::new(0.0, 0.0, 1.25),
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.5 * PI),
    );
    assert_isometry_eq(&expected, &transform);
}

#[test]
fn when_computing_the_motion_of_a_joint_without_axis_should_be_identity() {
    let joint = Joint::new(
        "placeholder".to_string(),
        JointID::new(3),
        JointKind::Revolute,
        Vector3::zeros(),
        FrameID::new(0),
        FrameID::new(1),
        Isometry3::identity(),
        JointLimits::new(-1.0, 1.0),
    );

    assert_isometry_eq(&Isometry3::identity(), &joint.motion(0.7));
}
