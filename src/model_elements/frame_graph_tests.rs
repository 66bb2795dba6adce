use std::f64::consts::PI;

use float_cmp::{ApproxEq, F64Margin};
use nalgebra::{Isometry3, Matrix4, Point3, Translation3, UnitQuaternion, Vector3};

use crate::model_elements::{
    frame_elements::{JointKind, JointLimits},
    frame_graph::*,
    mechanism::JointDescription,
};
use crate::Error;

fn assert_matrix_eq(expected: &Matrix4<f64>, actual: &Matrix4<f64>) {
    let mut expected_it = expected.iter();
    let mut calculated_it = actual.iter();
    loop {
        match (expected_it.next(), calculated_it.next()) {
            (Some(a), Some(b)) => {
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
            (None, None) => break,
            _ => panic!("The matrices have different sizes"),
        }
    }
}

fn offset(x: f64, y: f64, z: f64) -> Isometry3<f64> {
    Isometry3::from_parts(Translation3::new(x, y, z), UnitQuaternion::identity())
}

/// A small tree: base -> upper (revolute z) -> lower (revolute y) -> tip (fixed), plus
/// a side branch base -> side (prismatic x).
fn create_graph() -> FrameGraph {
    let mut graph = FrameGraph::new();
    graph
        .add_joint(
            &JointDescription::new("shoulder", JointKind::Revolute, "base", "upper")
                .with_origin(offset(0.0, 0.0, 0.1))
                .with_axis(Vector3::z())
                .with_limits(JointLimits::new(-PI, PI)),
        )
        .unwrap();
    graph
        .add_joint(
            &JointDescription::new("elbow", JointKind::Revolute, "upper", "lower")
                .with_origin(Isometry3::from_parts(
                    Translation3::new(0.3, 0.0, 0.0),
                    UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.25 * PI),
                ))
                .with_axis(Vector3::y())
                .with_limits(JointLimits::new(-1.0, 1.0)),
        )
        .unwrap();
    graph
        .add_joint(
            &JointDescription::new("wrist", JointKind::Fixed, "lower", "tip")
                .with_origin(offset(0.2, 0.0, 0.0)),
        )
        .unwrap();
    graph
        .add_joint(
            &JointDescription::new("slide", JointKind::Prismatic, "base", "side")
                .with_axis(Vector3::x())
                .with_limits(JointLimits::new(0.0, 0.5)),
        )
        .unwrap();

    graph
}

#[test]
fn when_adding_a_joint_should_create_the_frames() {
    let graph = create_graph();

    assert_eq!(5, graph.number_of_frames());
    for name in ["base", "upper", "lower", "tip", "side"] {
        assert!(graph.has_frame(name), "Expected the frame {}", name);
    }

    assert!(graph.has_joint("elbow"));
    assert!(!graph.has_joint("knee"));
    assert_eq!(Some(EdgeKind::Joint), graph.edge_kind("upper", "base"));
    assert_eq!(Some(EdgeKind::Joint), graph.edge_kind("base", "upper"));
    assert_eq!(None, graph.edge_kind("base", "tip"));
}

#[test]
fn when_adding_a_duplicate_joint_should_error() {
    let mut graph = create_graph();

    let result = graph.add_joint(&JointDescription::new(
        "elbow",
        JointKind::Revolute,
        "a",
        "b",
    ));

    assert!(matches!(result, Err(Error::MalformedMechanism { .. })));
}

#[test]
fn when_getting_the_transform_between_adjacent_frames_should_use_the_joint_origin() {
    let graph = create_graph();

    let transform = graph.get_transform("upper", "base").unwrap();
    assert_matrix_eq(&offset(0.0, 0.0, 0.1).to_homogeneous(), &transform.to_homogeneous());

    let inverse = graph.get_transform("base", "upper").unwrap();
    assert_matrix_eq(
        &offset(0.0, 0.0, -0.1).to_homogeneous(),
        &inverse.to_homogeneous(),
    );
}

#[test]
fn when_getting_the_transform_along_a_path_should_compose_the_edges() {
    let mut graph = create_graph();
    graph.set_joint("shoulder", 0.5 * PI).unwrap();

    // tip -> lower -> upper -> base. The tip origin is 0.2 along the lower x-axis, which
    // is aligned with the upper x-axis. The shoulder turns the upper x-axis onto base y.
    let transform = graph.get_transform("tip", "base").unwrap();
    let tip = transform.transform_point(&Point3::origin());

    assert!(tip.x.abs() < 1e-12);
    assert!((tip.y - 0.5).abs() < 1e-12);
    assert!((tip.z - 0.1).abs() < 1e-12);

    let homogeneous = graph.get_homogeneous_transform("tip", "base").unwrap();
    assert_matrix_eq(&transform.to_homogeneous(), &homogeneous);
}

#[test]
fn when_composing_a_transform_with_its_reverse_should_be_identity() {
    let mut graph = create_graph();
    graph.set_joint("shoulder", 0.3).unwrap();
    graph.set_joint("elbow", -0.7).unwrap();
    graph.set_joint("slide", 0.2).unwrap();
    graph.add_transform("base", "world", offset(1.0, 2.0, 3.0));

    let names: Vec<String> = graph.frames().map(|f| f.name().to_string()).collect();
    for a in &names {
        for b in &names {
            let forward = graph.get_transform(a, b).unwrap();
            let backward = graph.get_transform(b, a).unwrap();

            assert_matrix_eq(
                &Matrix4::identity(),
                &(forward * backward).to_homogeneous(),
            );
        }
    }
}

#[test]
fn when_getting_the_transform_to_the_same_frame_should_be_identity() {
    let graph = create_graph();

    let transform = graph.get_transform("lower", "lower").unwrap();
    assert_matrix_eq(&Matrix4::identity(), &transform.to_homogeneous());
}

#[test]
fn when_frames_are_disconnected_should_return_no_path() {
    let mut graph = create_graph();
    graph.add_frame("island");

    let result = graph.get_transform("tip", "island");
    assert_eq!(
        Err(Error::NoPath {
            from: "tip".to_string(),
            to: "island".to_string()
        }),
        result
    );
}

#[test]
fn when_a_frame_is_unknown_should_return_unknown_frame() {
    let graph = create_graph();

    let result = graph.get_transform("tip", "nowhere");
    assert_eq!(
        Err(Error::UnknownFrame {
            name: "nowhere".to_string()
        }),
        result
    );
}

#[test]
fn when_updating_a_dynamic_transform_should_overwrite_the_edge() {
    let mut graph = create_graph();

    graph.add_transform("base", "world", offset(1.0, 0.0, 0.0));
    assert_eq!(Some(EdgeKind::Dynamic), graph.edge_kind("base", "world"));

    let first = graph.get_transform("tip", "world").unwrap();

    graph.add_transform("base", "world", offset(0.0, 0.0, 2.0));
    let second = graph.get_transform("tip", "world").unwrap();

    let difference = second.translation.vector - first.translation.vector;
    assert!((difference - Vector3::new(-1.0, 0.0, 2.0)).norm() < 1e-12);
}

#[test]
fn when_adding_a_transform_in_the_reverse_direction_should_replace_the_edge() {
    let mut graph = create_graph();

    graph.add_transform("base", "world", offset(1.0, 0.0, 0.0));
    graph.add_transform("world", "base", offset(0.0, 1.0, 0.0));

    let transform = graph.get_transform("base", "world").unwrap();
    assert_matrix_eq(
        &offset(0.0, -1.0, 0.0).to_homogeneous(),
        &transform.to_homogeneous(),
    );
}

#[test]
fn when_adding_a_static_transform_should_attach_the_frame() {
    let mut graph = create_graph();

    graph.add_static_transform("marker", "tip", offset(0.0, 0.05, 0.0));

    assert_eq!(Some(EdgeKind::Static), graph.edge_kind("marker", "tip"));
    let transform = graph.get_transform("marker", "lower").unwrap();
    assert!((transform.translation.vector - Vector3::new(0.2, 0.05, 0.0)).norm() < 1e-12);
}

#[test]
fn when_getting_joint_limits_should_return_the_limits() {
    let graph = create_graph();

    assert_eq!(
        JointLimits::new(-1.0, 1.0),
        graph.get_joint_limits("elbow").unwrap()
    );
    assert_eq!(
        Err(Error::UnknownJoint {
            name: "knee".to_string()
        }),
        graph.get_joint_limits("knee")
    );
}

#[test]
fn when_setting_a_joint_outside_its_limits_should_clamp() {
    let mut graph = create_graph();

    graph.set_joint("slide", 3.0).unwrap();
    assert_eq!(0.5, graph.joint("slide").unwrap().position());

    let transform = graph.get_transform("side", "base").unwrap();
    assert!((transform.translation.vector - Vector3::new(0.5, 0.0, 0.0)).norm() < 1e-12);

    assert_eq!(
        Err(Error::UnknownJoint {
            name: "knee".to_string()
        }),
        graph.set_joint("knee", 0.0)
    );
}

#[test]
fn when_finding_a_path_should_return_the_steps_in_order() {
    let graph = create_graph();

    let tip = graph.frame_id("tip").unwrap();
    let side = graph.frame_id("side").unwrap();
    let path = graph.path(tip, side).unwrap();

    let names: Vec<(&str, &str)> = path
        .iter()
        .map(|s| (graph.frame(s.from).name(), graph.frame(s.to).name()))
        .collect();
    assert_eq!(
        vec![
            ("tip", "lower"),
            ("lower", "upper"),
            ("upper", "base"),
            ("base", "side")
        ],
        names
    );

    assert!(!path[0].is_inverted(&graph));
    assert!(path[3].is_inverted(&graph));
}
