//! Defines the kinematic chains used for forward and inverse kinematics.
//!
//! A [Chain] is an ordered list of joints between a base frame and an end-effector frame.
//! When the chain is created the path between the two frames is copied out of the
//! [FrameGraph], so solving a chain never touches the graph again. Joints on the path that
//! the chain does not name are held at the position they had in the graph.

extern crate nalgebra as na;

use std::collections::{BTreeMap, HashSet};

use na::{DMatrix, DVector, Isometry3, Point3, Unit, Vector3, Vector6};
use rand::{rngs::StdRng, SeedableRng};
use tracing::debug;

use crate::{
    inverse_kinematics::{
        self, CoordinateBounds, DifferentiableKinematics, InverseKinematicsConfig,
        InverseKinematicsReport, Target,
    },
    virtual_joints::VirtualJoint,
    Error,
};

use super::{
    frame_elements::{Joint, JointKind, JointLimits, MINIMUM_AXIS_LENGTH},
    frame_graph::{EdgeTransform, FrameGraph, PathStep},
};

#[cfg(test)]
#[path = "chain_tests.rs"]
mod chain_tests;

/// A joint on the path from the base frame to the end-effector frame.
#[derive(Clone, Debug)]
struct PathJoint {
    joint: Joint,

    /// True when the path runs from the parent frame of the joint to the child frame.
    forward: bool,

    /// The position used when no chain coordinate drives the joint.
    held: f64,

    /// A position that overrides every coordinate that drives the joint.
    locked: Option<f64>,
}

/// A single transform on the path from the base frame to the end-effector frame.
#[derive(Clone, Debug)]
enum Segment {
    Rigid(Isometry3<f64>),
    Joint(usize),
}

/// Describes how a chain coordinate moves the joints on the path.
#[derive(Clone, Debug)]
enum Drive {
    /// The coordinate is the position of the path joint with the given index.
    Real(usize),
    /// The coordinate is resolved through a virtual joint. The targets hold the path
    /// index of every real joint of the virtual joint, if that joint is on the path.
    Virtual {
        joint: VirtualJoint,
        targets: Vec<Option<usize>>,
    },
}

/// The geometry of a chain, copied out of the frame graph.
#[derive(Clone, Debug)]
struct ChainGeometry {
    segments: Vec<Segment>,
    path_joints: Vec<PathJoint>,
    drives: Vec<Drive>,
    bounds: Vec<CoordinateBounds>,
}

impl ChainGeometry {
    /// Returns the pose of the end-effector frame in the base frame.
    fn forward(&self, coordinates: &DVector<f64>) -> Isometry3<f64> {
        let values = self.path_joint_values(coordinates);

        let mut transform = Isometry3::identity();
        for segment in &self.segments {
            let next = match segment {
                Segment::Rigid(t) => *t,
                Segment::Joint(index) => {
                    let path_joint = &self.path_joints[*index];
                    let t = path_joint.joint.transform_for_position(values[*index]);
                    if path_joint.forward {
                        t
                    } else {
                        t.inverse()
                    }
                }
            };
            transform *= next;
        }

        transform
    }

    /// Returns the position of every joint on the path for the given chain coordinates.
    fn path_joint_values(&self, coordinates: &DVector<f64>) -> Vec<f64> {
        let mut values: Vec<f64> = self.path_joints.iter().map(|p| p.held).collect();

        for (coordinate, drive) in coordinates.iter().zip(&self.drives) {
            match drive {
                Drive::Real(index) => values[*index] = *coordinate,
                Drive::Virtual { joint, targets } => {
                    for ((_, value), target) in joint.resolve(*coordinate).iter().zip(targets) {
                        if let Some(index) = target {
                            values[*index] = *value;
                        }
                    }
                }
            }
        }

        for (value, path_joint) in values.iter_mut().zip(&self.path_joints) {
            if let Some(locked) = path_joint.locked {
                *value = locked;
            }
            *value = path_joint.joint.limits().clamp(*value);
        }

        values
    }
}

impl DifferentiableKinematics for ChainGeometry {
    fn bounds(&self) -> &[CoordinateBounds] {
        &self.bounds
    }

    fn pose_and_jacobian(&self, coordinates: &DVector<f64>) -> (Isometry3<f64>, DMatrix<f64>) {
        let values = self.path_joint_values(coordinates);

        // The axis and pivot of every path joint in the base frame. The sign of the axis
        // accounts for joints that are traversed from child to parent.
        let mut axes: Vec<Option<(JointKind, Vector3<f64>, Vector3<f64>)>> =
            vec![None; self.path_joints.len()];

        let mut transform = Isometry3::identity();
        for segment in &self.segments {
            match segment {
                Segment::Rigid(t) => transform *= *t,
                Segment::Joint(index) => {
                    let path_joint = &self.path_joints[*index];
                    let joint = &path_joint.joint;
                    let value = values[*index];

                    if path_joint.forward {
                        let frame = transform * joint.origin();
                        axes[*index] = Some((
                            joint.kind(),
                            frame.rotation * joint.axis(),
                            frame.translation.vector,
                        ));
                        transform = frame * joint.motion(value);
                    } else {
                        axes[*index] = Some((
                            joint.kind(),
                            -(transform.rotation * joint.axis()),
                            transform.translation.vector,
                        ));
                        transform *= joint.transform_for_position(value).inverse();
                    }
                }
            }
        }

        let end_effector = transform.translation.vector;
        let path_columns: Vec<Vector6<f64>> = axes
            .iter()
            .zip(&self.path_joints)
            .map(|(axis, path_joint)| match (axis, path_joint.locked) {
                (Some((kind, axis, pivot)), None) => joint_column(*kind, axis, pivot, &end_effector),
                _ => Vector6::zeros(),
            })
            .collect();

        let mut jacobian = DMatrix::zeros(6, self.drives.len());
        for (column, (drive, coordinate)) in self.drives.iter().zip(coordinates.iter()).enumerate()
        {
            let mut total = Vector6::zeros();
            match drive {
                Drive::Real(index) => total += path_columns[*index],
                Drive::Virtual { joint, targets } => {
                    for ((_, sensitivity), target) in
                        joint.sensitivities(*coordinate).iter().zip(targets)
                    {
                        if let Some(index) = target {
                            total += path_columns[*index] * *sensitivity;
                        }
                    }
                }
            }
            jacobian.column_mut(column).copy_from(&total);
        }

        (transform, jacobian)
    }
}

/// Returns the Jacobian column of a single joint. The first three rows are the linear
/// velocity of the end-effector, the last three the angular velocity.
fn joint_column(
    kind: JointKind,
    axis: &Vector3<f64>,
    pivot: &Vector3<f64>,
    end_effector: &Vector3<f64>,
) -> Vector6<f64> {
    match kind {
        JointKind::Fixed => Vector6::zeros(),
        JointKind::Revolute => {
            if axis.norm() < MINIMUM_AXIS_LENGTH {
                return Vector6::zeros();
            }

            let axis = Unit::new_normalize(*axis).into_inner();
            let linear = axis.cross(&(end_effector - pivot));
            Vector6::new(linear.x, linear.y, linear.z, axis.x, axis.y, axis.z)
        }
        JointKind::Prismatic => Vector6::new(axis.x, axis.y, axis.z, 0.0, 0.0, 0.0),
    }
}

/// An ordered list of joints between a base frame and an end-effector frame, with forward
/// and inverse kinematics.
///
/// ## Notes
///
/// * A chain may name virtual joints. Their value is resolved onto the real joints they
///   drive, and only those real joints that lie on the path have a geometric effect.
/// * Joint positions are clamped to the joint limits, both when computing poses and for
///   every iterate of the inverse kinematics.
#[derive(Clone, Debug)]
pub struct Chain {
    base_frame: String,
    end_effector_frame: String,
    joint_names: Vec<String>,
    geometry: ChainGeometry,

    /// The result of the most recent inverse kinematics solve.
    joint_angles: DVector<f64>,

    rng: StdRng,
    seed: Option<u64>,
}

impl Chain {
    /// Returns the name of the base frame.
    pub fn base_frame(&self) -> &str {
        self.base_frame.as_ref()
    }

    /// Returns a value indicating if the chain names the joint, or if the joint lies on the
    /// path from the base frame to the end-effector frame.
    pub fn contains_joint(&self, name: &str) -> bool {
        self.joint_names.iter().any(|n| n == name)
            || self.geometry.path_joints.iter().any(|p| p.joint.name() == name)
    }

    /// Returns the name of the end-effector frame.
    pub fn end_effector_frame(&self) -> &str {
        self.end_effector_frame.as_ref()
    }

    /// Returns the pose of the end-effector frame in the base frame for the given joint
    /// angles.
    ///
    /// ## Parameters
    ///
    /// * 'joint_angles' - One value per chain joint, in chain order
    ///
    /// ## Errors
    ///
    /// * [Error::InvalidJointVector] - Returned when the number of values does not match the
    ///   number of joints.
    pub fn forward(&self, joint_angles: &DVector<f64>) -> Result<Isometry3<f64>, Error> {
        self.check_length(joint_angles)?;
        Ok(self.geometry.forward(joint_angles))
    }

    /// Returns the end-effector pose for every joint vector of a trajectory.
    ///
    /// ## Errors
    ///
    /// * [Error::InvalidJointVector] - Returned when a joint vector has the wrong length.
    pub fn forward_trajectory(
        &self,
        trajectory: &[DVector<f64>],
    ) -> Result<Vec<Isometry3<f64>>, Error> {
        trajectory.iter().map(|q| self.forward(q)).collect()
    }

    /// Returns the joint angles that move the end-effector to the target pose.
    ///
    /// ## Parameters
    ///
    /// * 'target' - The pose of the end-effector frame in the base frame
    /// * 'initial_guess' - The joint angles to start from. Sampled randomly when absent.
    /// * 'config' - The solver settings
    ///
    /// ## Errors
    ///
    /// * [Error::InvalidJointVector] - Returned when the initial guess has the wrong length.
    pub fn inverse(
        &mut self,
        target: &Isometry3<f64>,
        initial_guess: Option<&DVector<f64>>,
        config: &InverseKinematicsConfig,
    ) -> Result<DVector<f64>, Error> {
        Ok(self
            .inverse_with_report(target, initial_guess, config)?
            .into_joint_angles())
    }

    /// Returns the joint angles that move the end-effector origin to the target position.
    /// The orientation of the end-effector is not constrained.
    ///
    /// The best solution found is returned even if it does not meet the tolerance. Use
    /// [Chain::inverse_position_with_report] to check convergence.
    ///
    /// ## Parameters
    ///
    /// * 'target' - The position of the end-effector origin in the base frame
    /// * 'initial_guess' - The joint angles to start from. Sampled randomly when absent.
    /// * 'config' - The solver settings
    ///
    /// ## Errors
    ///
    /// * [Error::InvalidJointVector] - Returned when the initial guess has the wrong length.
    pub fn inverse_position(
        &mut self,
        target: &Point3<f64>,
        initial_guess: Option<&DVector<f64>>,
        config: &InverseKinematicsConfig,
    ) -> Result<DVector<f64>, Error> {
        Ok(self
            .inverse_position_with_report(target, initial_guess, config)?
            .into_joint_angles())
    }

    /// Solves for the target position and returns the full solver report.
    ///
    /// ## Errors
    ///
    /// * [Error::InvalidJointVector] - Returned when the initial guess has the wrong length.
    pub fn inverse_position_with_report(
        &mut self,
        target: &Point3<f64>,
        initial_guess: Option<&DVector<f64>>,
        config: &InverseKinematicsConfig,
    ) -> Result<InverseKinematicsReport, Error> {
        self.solve(&Target::Position(*target), initial_guess, config)
    }

    /// Solves for the target pose and returns the full solver report.
    ///
    /// ## Errors
    ///
    /// * [Error::InvalidJointVector] - Returned when the initial guess has the wrong length.
    pub fn inverse_with_report(
        &mut self,
        target: &Isometry3<f64>,
        initial_guess: Option<&DVector<f64>>,
        config: &InverseKinematicsConfig,
    ) -> Result<InverseKinematicsReport, Error> {
        self.solve(&Target::Pose(*target), initial_guess, config)
    }

    /// Returns the joint angles for every pose of a trajectory. Each pose is seeded with the
    /// solution of the previous pose, the first pose with the initial guess.
    ///
    /// ## Errors
    ///
    /// * [Error::InvalidJointVector] - Returned when the initial guess has the wrong length.
    pub fn inverse_trajectory(
        &mut self,
        poses: &[Isometry3<f64>],
        initial_guess: Option<&DVector<f64>>,
        config: &InverseKinematicsConfig,
    ) -> Result<Vec<DVector<f64>>, Error> {
        let mut previous = initial_guess.cloned();
        let mut trajectory = Vec::with_capacity(poses.len());
        for pose in poses {
            let q = self.inverse(pose, previous.as_ref(), config)?;
            previous = Some(q.clone());
            trajectory.push(q);
        }

        Ok(trajectory)
    }

    /// Returns the result of the most recent inverse kinematics solve, or zeros when the
    /// chain has not been solved yet.
    pub fn joint_angles(&self) -> &DVector<f64> {
        &self.joint_angles
    }

    /// Returns the limits of every chain joint, in chain order.
    pub fn joint_limits(&self) -> Vec<JointLimits> {
        self.geometry.bounds.iter().map(|b| b.limits).collect()
    }

    /// Returns the names of the chain joints in chain order.
    pub fn joint_names(&self) -> &[String] {
        &self.joint_names
    }

    /// Holds a joint at a constant position.
    ///
    /// A chain joint keeps the given position during inverse kinematics. A joint that only
    /// lies on the path is moved to the given position and overrides any virtual joint
    /// that drives it.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownJoint] - Returned when the chain does not contain the joint.
    pub fn lock_joint(&mut self, name: &str, position: f64) -> Result<(), Error> {
        if let Some(index) = self.joint_names.iter().position(|n| n == name) {
            let bound = &mut self.geometry.bounds[index];
            bound.locked = Some(position);
            self.joint_angles[index] = position;
            return Ok(());
        }

        match self
            .geometry
            .path_joints
            .iter_mut()
            .find(|p| p.joint.name() == name)
        {
            Some(path_joint) => {
                path_joint.locked = Some(position);
                Ok(())
            }
            None => Err(Error::UnknownJoint {
                name: name.to_string(),
            }),
        }
    }

    /// Creates a new [Chain] from the path between two frames of a graph.
    ///
    /// ## Parameters
    ///
    /// * 'graph' - The graph that contains the frames and joints
    /// * 'virtual_joints' - The virtual joints that the chain may name
    /// * 'joint_names' - The chain joints, ordered from the base frame to the end-effector
    /// * 'base_frame' - The name of the base frame
    /// * 'end_effector_frame' - The name of the end-effector frame
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownFrame] - Returned when either frame is unknown.
    /// * [Error::UnknownJoint] - Returned when a joint is unknown.
    /// * [Error::DisconnectedChain] - Returned when the frames are not connected, or when the
    ///   real joints are not on the path in the given order.
    pub(crate) fn new(
        graph: &FrameGraph,
        virtual_joints: &BTreeMap<String, VirtualJoint>,
        joint_names: &[&str],
        base_frame: &str,
        end_effector_frame: &str,
    ) -> Result<Self, Error> {
        let base_id = graph.frame_id(base_frame)?;
        let end_effector_id = graph.frame_id(end_effector_frame)?;
        for name in joint_names {
            if !virtual_joints.contains_key(*name) && !graph.has_joint(name) {
                return Err(Error::UnknownJoint {
                    name: name.to_string(),
                });
            }
        }

        let disconnected = |reason: String| Error::DisconnectedChain {
            base: base_frame.to_string(),
            end_effector: end_effector_frame.to_string(),
            reason,
        };

        let path = graph
            .path(base_id, end_effector_id)
            .map_err(|_| disconnected("the frames are not connected".to_string()))?;

        let (segments, path_joints) = Self::copy_path(graph, &path);

        let mut seen = HashSet::new();
        let mut last_index = None;
        let mut drives = Vec::with_capacity(joint_names.len());
        let mut bounds = Vec::with_capacity(joint_names.len());
        for name in joint_names {
            if !seen.insert(*name) {
                return Err(disconnected(format!(
                    "the joint {} is listed more than once",
                    name
                )));
            }

            if let Some(virtual_joint) = virtual_joints.get(*name) {
                let targets = virtual_joint
                    .real_joints()
                    .iter()
                    .map(|real| path_joints.iter().position(|p| p.joint.name() == *real))
                    .collect();
                drives.push(Drive::Virtual {
                    joint: virtual_joint.clone(),
                    targets,
                });
                bounds.push(CoordinateBounds {
                    kind: JointKind::Revolute,
                    limits: virtual_joint.limits(graph)?,
                    locked: None,
                });
                continue;
            }

            let index = path_joints
                .iter()
                .position(|p| p.joint.name() == *name)
                .ok_or_else(|| {
                    disconnected(format!("the joint {} is not on the path", name))
                })?;

            if last_index.map_or(false, |last| index < last) {
                return Err(disconnected(format!(
                    "the joint {} is out of order",
                    name
                )));
            }
            last_index = Some(index);

            let joint = &path_joints[index].joint;
            drives.push(Drive::Real(index));
            bounds.push(CoordinateBounds {
                kind: joint.kind(),
                limits: *joint.limits(),
                locked: None,
            });
        }

        debug!(
            base = base_frame,
            end_effector = end_effector_frame,
            joints = joint_names.len(),
            path_joints = path_joints.len(),
            "Created kinematic chain"
        );

        Ok(Self {
            base_frame: base_frame.to_string(),
            end_effector_frame: end_effector_frame.to_string(),
            joint_names: joint_names.iter().map(|n| n.to_string()).collect(),
            geometry: ChainGeometry {
                segments,
                path_joints,
                drives,
                bounds,
            },
            joint_angles: DVector::zeros(joint_names.len()),
            rng: StdRng::from_entropy(),
            seed: None,
        })
    }

    /// Returns the number of chain joints.
    pub fn number_of_joints(&self) -> usize {
        self.joint_names.len()
    }

    /// Reseeds the random number generator used for random restarts.
    pub fn set_random_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.seed = Some(seed);
    }

    fn check_length(&self, joint_angles: &DVector<f64>) -> Result<(), Error> {
        if joint_angles.len() != self.number_of_joints() {
            return Err(Error::InvalidJointVector {
                expected: self.number_of_joints(),
                actual: joint_angles.len(),
            });
        }

        Ok(())
    }

    /// Copies the transforms along the path out of the graph. Every segment maps
    /// coordinates in the frame further from the base into the frame closer to the base.
    fn copy_path(graph: &FrameGraph, path: &[PathStep]) -> (Vec<Segment>, Vec<PathJoint>) {
        let mut segments = Vec::with_capacity(path.len());
        let mut path_joints = Vec::new();

        for step in path {
            let joint_id = graph.edge(&step.key(graph)).and_then(|edge| match edge.transform {
                EdgeTransform::Joint(id) => Some(id),
                EdgeTransform::Rigid(_) => None,
            });

            match joint_id {
                Some(id) => {
                    let joint = graph.joint_unchecked(id).clone();
                    let forward = joint.child() == step.to;
                    let held = joint.position();
                    segments.push(Segment::Joint(path_joints.len()));
                    path_joints.push(PathJoint {
                        joint,
                        forward,
                        held,
                        locked: None,
                    });
                }
                None => segments.push(Segment::Rigid(graph.step_transform(&PathStep {
                    from: step.to,
                    to: step.from,
                }))),
            }
        }

        (segments, path_joints)
    }

    fn solve(
        &mut self,
        target: &Target,
        initial_guess: Option<&DVector<f64>>,
        config: &InverseKinematicsConfig,
    ) -> Result<InverseKinematicsReport, Error> {
        if let Some(q) = initial_guess {
            self.check_length(q)?;
        }

        if config.seed().is_some() && config.seed() != self.seed {
            if let Some(seed) = config.seed() {
                self.set_random_seed(seed);
            }
        }

        let report = inverse_kinematics::solve(
            &self.geometry,
            target,
            initial_guess,
            config,
            &mut self.rng,
        );
        self.joint_angles = report.joint_angles().clone();

        Ok(report)
    }
}
