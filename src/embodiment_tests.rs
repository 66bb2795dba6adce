use std::collections::BTreeMap;
use std::f64::consts::PI;

use nalgebra::{DVector, Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

use super::*;
use crate::target_configurations::MechanismSource;
use crate::virtual_joints::VirtualJoint;

const HAND_URDF: &str = r#"
<robot name="test_hand">
    <link name="palm"/>
    <link name="index_proximal"/>
    <link name="index_middle"/>
    <link name="index_distal"/>
    <link name="index_tip"/>
    <link name="thumb_base"/>
    <link name="thumb_distal"/>
    <link name="thumb_tip"/>

    <joint name="j_index_base" type="revolute">
        <origin xyz="0 0 0.05" rpy="0 0 0"/>
        <parent link="palm"/>
        <child link="index_proximal"/>
        <axis xyz="1 0 0"/>
        <limit lower="0" upper="1.6"/>
    </joint>
    <joint name="j_index_middle" type="revolute">
        <origin xyz="0 0 0.04" rpy="0 0 0"/>
        <parent link="index_proximal"/>
        <child link="index_middle"/>
        <axis xyz="1 0 0"/>
        <limit lower="0" upper="1.6"/>
    </joint>
    <joint name="j_index_distal" type="revolute">
        <origin xyz="0 0 0.03" rpy="0 0 0"/>
        <parent link="index_middle"/>
        <child link="index_distal"/>
        <axis xyz="1 0 0"/>
        <limit lower="0" upper="1.6"/>
    </joint>
    <joint name="j_index_tip" type="fixed">
        <origin xyz="0 0 0.02" rpy="0 0 0"/>
        <parent link="index_distal"/>
        <child link="index_tip"/>
    </joint>

    <joint name="j_thumb_opp" type="revolute">
        <origin xyz="0.03 0 0.01" rpy="0 0 0"/>
        <parent link="palm"/>
        <child link="thumb_base"/>
        <axis xyz="0 0 1"/>
        <limit lower="-1" upper="1"/>
    </joint>
    <joint name="j_thumb_fle" type="revolute">
        <origin xyz="0.01 0 0" rpy="0 0 0"/>
        <parent link="thumb_base"/>
        <child link="thumb_distal"/>
        <axis xyz="1 0 0"/>
        <limit lower="0" upper="1.2"/>
    </joint>
    <joint name="j_thumb_tip" type="fixed">
        <origin xyz="0 0 0.04" rpy="0 0 0"/>
        <parent link="thumb_distal"/>
        <child link="thumb_tip"/>
    </joint>
</robot>
"#;

/// A source hand whose fingertip position is given directly by three pose parameters.
struct DirectHand {
    fingers: BTreeMap<String, Vec<usize>>,
}

impl DirectHand {
    fn new() -> Self {
        let mut fingers = BTreeMap::new();
        fingers.insert("thumb".to_string(), vec![0, 1, 2]);
        fingers.insert("index".to_string(), vec![3, 4, 5]);
        fingers.insert("middle".to_string(), vec![6, 7, 8]);
        Self { fingers }
    }
}

impl HandStateOracle for DirectHand {
    fn finger_pose_parameter_indices(&self, finger: &str) -> Option<&[usize]> {
        self.fingers.get(finger).map(|i| i.as_slice())
    }

    fn fingertip_position(&self, finger: &str, parameters: &[f64]) -> Result<Point3<f64>, Error> {
        if !self.fingers.contains_key(finger) {
            return Err(Error::Configuration {
                reason: format!("unknown finger {}", finger),
            });
        }

        Ok(Point3::new(parameters[0], parameters[1], parameters[2]))
    }
}

fn base_to_base() -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(0.01, 0.0, -0.02),
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5 * PI),
    )
}

fn target() -> TargetConfiguration {
    TargetConfiguration::new("test_hand", "palm", MechanismSource::Urdf(HAND_URDF.to_string()))
        .with_finger("thumb", &["j_thumb_opp", "j_thumb_fle"], "thumb_tip")
        .with_finger("index", &["j_index_base", "j_index_curl"], "index_tip")
        .with_base_to_base(base_to_base())
        .with_virtual_joint(
            "j_index_curl",
            VirtualJoint::sequential_coupling("j_index_middle", "j_index_distal", 1.6),
        )
}

fn solver() -> EmbodimentSolver {
    EmbodimentSolver::new(&DirectHand::new(), &target(), &["thumb", "index"])
        .unwrap()
        .with_config(InverseKinematicsConfig::default().with_seed(3))
}

/// Returns the robot fingertip position for the joint angles, together with the matching
/// source fingertip position.
fn reachable(solver: &EmbodimentSolver, finger: &str, q: &[f64]) -> (Point3<f64>, Point3<f64>) {
    let pose = solver
        .finger_chain(finger)
        .unwrap()
        .forward(&DVector::from_column_slice(q))
        .unwrap();
    let robot = Point3::from(pose.translation.vector);
    let source = base_to_base().inverse_transform_point(&robot);

    (robot, source)
}

#[test]
fn when_creating_a_solver_should_create_a_chain_per_finger() {
    let solver = solver();

    assert_eq!(vec!["thumb", "index"], solver.fingers().collect::<Vec<_>>());
    assert_eq!(
        &["j_index_base".to_string(), "j_index_curl".to_string()][..],
        solver.finger_chain("index").unwrap().joint_names()
    );
    assert_eq!("index_tip", solver.finger_chain("index").unwrap().end_effector_frame());
    assert!(solver.finger_chain("middle").is_none());

    assert_eq!(&DVector::zeros(2), solver.warm_start("thumb").unwrap());
    assert_eq!(Some(3), solver.config().seed());
    assert!(solver.model().graph().has_frame("test_hand"));
}

#[test]
fn when_the_source_hand_lacks_a_finger_should_error() {
    let result = EmbodimentSolver::new(&DirectHand::new(), &target(), &["thumb", "ring"]);

    assert!(matches!(result, Err(Error::Configuration { .. })));
}

#[test]
fn when_the_target_lacks_a_finger_should_error() {
    let result = EmbodimentSolver::new(&DirectHand::new(), &target(), &DEFAULT_FINGERS);

    assert!(matches!(result, Err(Error::Configuration { .. })));
}

#[test]
fn when_solving_should_reach_the_mapped_fingertips() {
    let mut solver = solver();
    let (thumb_goal, thumb_source) = reachable(&solver, "thumb", &[0.3, 0.5]);
    let (index_goal, index_source) = reachable(&solver, "index", &[0.4, 1.0]);

    let snapshot = SourceSnapshot::new()
        .with_fingertip("thumb", thumb_source)
        .with_fingertip("index", index_source);

    let solution = solver.solve(&snapshot, None).unwrap();

    assert!((solution.desired_position("thumb").unwrap() - thumb_goal).norm() < 1e-12);
    assert!((solution.desired_position("index").unwrap() - index_goal).norm() < 1e-12);
    assert_eq!(2, solution.desired_positions().len());
    assert_eq!(2, solution.joint_angles().len());

    for (finger, goal) in [("thumb", thumb_goal), ("index", index_goal)] {
        let q = solution.finger_joint_angles(finger).unwrap();
        let pose = solver.finger_chain(finger).unwrap().forward(q).unwrap();
        assert!(
            (Point3::from(pose.translation.vector) - goal).norm() < 1e-4,
            "The {} did not reach its goal",
            finger
        );

        assert_eq!(q, solver.warm_start(finger).unwrap());
    }
}

#[test]
fn when_solving_should_place_the_base_in_the_world_frame() {
    let mut solver = solver();
    let (_, thumb_source) = reachable(&solver, "thumb", &[0.1, 0.2]);
    let (_, index_source) = reachable(&solver, "index", &[0.2, 0.3]);
    let snapshot = SourceSnapshot::new()
        .with_fingertip("thumb", thumb_source)
        .with_fingertip("index", index_source);

    solver.solve(&snapshot, None).unwrap();
    let base = solver
        .model()
        .graph()
        .get_transform("palm", WORLD_FRAME)
        .unwrap();
    assert!((base.to_homogeneous() - Isometry3::<f64>::identity().to_homogeneous()).norm() < 1e-12);

    let placed = Isometry3::from_parts(
        Translation3::new(0.5, -0.2, 1.0),
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.3),
    );
    solver.solve(&snapshot, Some(placed)).unwrap();
    let base = solver
        .model()
        .graph()
        .get_transform("palm", WORLD_FRAME)
        .unwrap();
    assert!((base.to_homogeneous() - placed.to_homogeneous()).norm() < 1e-12);
}

#[test]
fn when_the_snapshot_lacks_a_finger_should_error() {
    let mut solver = solver();
    let snapshot = SourceSnapshot::new().with_fingertip("thumb", Point3::origin());

    assert!(matches!(
        solver.solve(&snapshot, None),
        Err(Error::Configuration { .. })
    ));
}

#[test]
fn when_the_snapshot_lacks_a_later_finger_should_keep_all_warm_starts() {
    let mut solver = solver();
    let (_, thumb_source) = reachable(&solver, "thumb", &[0.4, 0.6]);
    let snapshot = SourceSnapshot::new().with_fingertip("thumb", thumb_source);

    assert!(solver.solve(&snapshot, None).is_err());

    assert_eq!(&DVector::zeros(2), solver.warm_start("thumb").unwrap());
    assert_eq!(&DVector::zeros(2), solver.warm_start("index").unwrap());
    assert_eq!(
        &DVector::zeros(2),
        solver.finger_chain("thumb").unwrap().joint_angles()
    );
}

#[test]
fn when_solving_again_should_start_from_the_previous_solution() {
    let config = InverseKinematicsConfig::default()
        .with_random_restarts(false)
        .with_seed(11);
    let mut solver = EmbodimentSolver::new(&DirectHand::new(), &target(), &["thumb", "index"])
        .unwrap()
        .with_config(config.clone());

    let (_, thumb_source) = reachable(&solver, "thumb", &[0.3, 0.5]);
    let (_, index_source) = reachable(&solver, "index", &[0.4, 1.0]);
    let first = SourceSnapshot::new()
        .with_fingertip("thumb", thumb_source)
        .with_fingertip("index", index_source);
    solver.solve(&first, None).unwrap();

    let (_, thumb_source) = reachable(&solver, "thumb", &[0.32, 0.53]);
    let (_, index_source) = reachable(&solver, "index", &[0.42, 1.05]);
    let second = SourceSnapshot::new()
        .with_fingertip("thumb", thumb_source)
        .with_fingertip("index", index_source);

    // Without restarts the solve from a given seed is deterministic, so the result must
    // match a solve that starts from the stored warm start.
    let mut expected = BTreeMap::new();
    for finger in ["thumb", "index"] {
        let mut chain = solver.finger_chain(finger).unwrap().clone();
        let warm_start = solver.warm_start(finger).unwrap().clone();
        let desired = base_to_base().transform_point(second.fingertip(finger).unwrap());
        let q = chain
            .inverse_position(&desired, Some(&warm_start), &config)
            .unwrap();
        expected.insert(finger, q);
    }

    let solution = solver.solve(&second, None).unwrap();

    for finger in ["thumb", "index"] {
        assert_eq!(
            &expected[finger],
            solution.finger_joint_angles(finger).unwrap(),
            "The {} was not seeded with its previous solution",
            finger
        );
    }
}

#[test]
fn when_a_finger_is_listed_twice_should_error() {
    let result = EmbodimentSolver::new(&DirectHand::new(), &target(), &["index", "index"]);

    assert_eq!(
        Some(Error::Configuration {
            reason: "the finger index is listed more than once".to_string()
        }),
        result.err()
    );
}

#[test]
fn when_getting_joint_values_should_expand_the_virtual_joints() {
    let solver = solver();

    let mut solution = EmbodimentSolution::default();
    solution
        .joint_angles
        .insert("index".to_string(), DVector::from_vec(vec![0.4, 2.0]));
    solution
        .joint_angles
        .insert("thumb".to_string(), DVector::from_vec(vec![-0.2, 0.7]));

    let values = solver.joint_values(&solution);

    assert_eq!(Some(&0.4), values.get("j_index_base"));
    assert_eq!(Some(&1.6), values.get("j_index_middle"));
    assert!((values["j_index_distal"] - 0.4).abs() < 1e-12);
    assert_eq!(Some(&-0.2), values.get("j_thumb_opp"));
    assert_eq!(Some(&0.7), values.get("j_thumb_fle"));
    assert!(!values.contains_key("j_index_curl"));
}

#[test]
fn when_applying_a_solution_should_move_the_frames() {
    let mut solver = solver();

    let mut solution = EmbodimentSolution::default();
    let q = DVector::from_vec(vec![0.4, 2.0]);
    solution.joint_angles.insert("index".to_string(), q.clone());

    solver.apply_to_graph(&solution).unwrap();

    let expected = solver.finger_chain("index").unwrap().forward(&q).unwrap();
    let actual = solver
        .model()
        .graph()
        .get_transform("index_tip", "palm")
        .unwrap();
    assert!((expected.to_homogeneous() - actual.to_homogeneous()).norm() < 1e-12);
}

#[test]
fn when_a_joint_is_constant_should_hold_it_in_the_solution() {
    let mut solver = solver();
    solver.set_constant_joint("j_thumb_opp", 0.3).unwrap();

    assert_eq!(0.3, solver.warm_start("thumb").unwrap()[0]);

    let (_, thumb_source) = reachable(&solver, "thumb", &[0.3, 0.5]);
    let (_, index_source) = reachable(&solver, "index", &[0.4, 1.0]);
    let snapshot = SourceSnapshot::new()
        .with_fingertip("thumb", thumb_source)
        .with_fingertip("index", index_source);

    let solution = solver.solve(&snapshot, None).unwrap();
    let thumb = solution.finger_joint_angles("thumb").unwrap();
    assert_eq!(0.3, thumb[0]);
    assert!((thumb[1] - 0.5).abs() < 1e-4);

    assert_eq!(Some(&0.3), solver.joint_values(&solution).get("j_thumb_opp"));
    assert_eq!(
        0.3,
        solver.model().graph().joint("j_thumb_opp").unwrap().position()
    );
}

#[test]
fn when_a_virtual_joint_is_constant_should_set_the_real_joints() {
    let mut solver = solver();
    solver.set_constant_joint("j_index_curl", 2.0).unwrap();

    let graph = solver.model().graph();
    assert_eq!(1.6, graph.joint("j_index_middle").unwrap().position());
    assert!((graph.joint("j_index_distal").unwrap().position() - 0.4).abs() < 1e-12);

    let values = solver.joint_values(&EmbodimentSolution::default());
    assert_eq!(Some(&1.6), values.get("j_index_middle"));
    assert!(!values.contains_key("j_index_curl"));
}

#[test]
fn when_setting_an_unknown_constant_joint_should_error() {
    let mut solver = solver();

    assert_eq!(
        Err(Error::UnknownJoint {
            name: "j_wrist".to_string()
        }),
        solver.set_constant_joint("j_wrist", 0.1)
    );
}

#[test]
fn when_creating_a_snapshot_from_a_hand_state_should_gather_the_parameters() {
    let hand = DirectHand::new();
    let pose: Vec<f64> = (0..9).map(|i| 0.1 * i as f64).collect();

    let snapshot = SourceSnapshot::from_hand_state(&hand, &pose, &["thumb", "index"]).unwrap();

    assert_eq!(
        Some(&Point3::new(pose[0], pose[1], pose[2])),
        snapshot.fingertip("thumb")
    );
    assert_eq!(
        Some(&Point3::new(pose[3], pose[4], pose[5])),
        snapshot.fingertip("index")
    );
    assert_eq!(None, snapshot.fingertip("middle"));
}

#[test]
fn when_creating_a_snapshot_with_missing_parameters_should_error() {
    let hand = DirectHand::new();

    let short = SourceSnapshot::from_hand_state(&hand, &[0.0; 4], &["index"]);
    assert!(matches!(short, Err(Error::Configuration { .. })));

    let unknown = SourceSnapshot::from_hand_state(&hand, &[0.0; 9], &["ring"]);
    assert!(matches!(unknown, Err(Error::Configuration { .. })));
}
